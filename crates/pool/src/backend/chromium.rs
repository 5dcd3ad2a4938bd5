//! Chromium-based worker backend.
//!
//! A worker is a headless Chromium process launched with an ephemeral
//! DevTools port; sessions are fresh targets opened through the DevTools
//! HTTP interface. The launch flow spawns, then probes `/json/version`
//! until the endpoint answers or the process exits.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use pq_core::{Error, Result};

use super::{SessionHandle, WorkerBackend, WorkerHandle};
use crate::session::SessionPolicy;

const PROBE_ATTEMPTS: usize = 25;
const PROBE_INTERVAL: Duration = Duration::from_millis(200);
const HTTP_TIMEOUT: Duration = Duration::from_millis(400);

/// Launches headless Chromium worker processes.
pub struct ChromiumBackend {
	executable: Option<PathBuf>,
	headless: bool,
	extra_args: Vec<String>,
}

impl ChromiumBackend {
	pub fn new() -> Self {
		Self {
			executable: None,
			headless: true,
			extra_args: Vec::new(),
		}
	}

	/// Uses an explicit browser binary instead of discovery.
	pub fn with_executable(mut self, path: PathBuf) -> Self {
		self.executable = Some(path);
		self
	}

	pub fn with_headless(mut self, headless: bool) -> Self {
		self.headless = headless;
		self
	}

	pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
		self.extra_args = args;
		self
	}
}

impl Default for ChromiumBackend {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl WorkerBackend for ChromiumBackend {
	async fn launch(&self) -> Result<Box<dyn WorkerHandle>> {
		let executable = match &self.executable {
			Some(path) => path.clone(),
			None => find_browser_executable().ok_or_else(|| {
				Error::WorkerCreationFailed(
					"could not find a Chromium-based browser; install one or configure an explicit executable".to_string(),
				)
			})?,
		};

		let port = ephemeral_port()?;
		let user_data_dir = std::env::temp_dir().join(format!("pq-worker-{port}"));
		std::fs::create_dir_all(&user_data_dir)
			.map_err(|err| Error::WorkerCreationFailed(format!("failed to create user data dir: {err}")))?;

		let mut command = Command::new(&executable);
		command
			.arg(format!("--remote-debugging-port={port}"))
			.arg(format!("--user-data-dir={}", user_data_dir.display()))
			.arg("--no-first-run")
			.arg("--no-default-browser-check");
		if self.headless {
			command.arg("--headless=new");
		}
		command.args(&self.extra_args);
		command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);

		let mut child = command
			.spawn()
			.map_err(|err| Error::WorkerCreationFailed(format!("failed to launch {}: {err}", executable.display())))?;

		let mut last_error = "endpoint not reachable".to_string();
		for _ in 0..PROBE_ATTEMPTS {
			tokio::time::sleep(PROBE_INTERVAL).await;

			if let Ok(Some(status)) = child.try_wait() {
				return Err(Error::WorkerCreationFailed(format!(
					"browser exited before the debugging endpoint came up (status: {status})"
				)));
			}

			match fetch_version(port).await {
				Ok(version) => {
					debug!(
						target = "pq.backend",
						port,
						browser = version.browser.as_deref().unwrap_or("unknown"),
						"worker endpoint ready"
					);
					return Ok(Box::new(ChromiumWorker {
						port,
						child: Mutex::new(child),
						user_data_dir,
					}));
				}
				Err(err) => last_error = err.to_string(),
			}
		}

		let _ = child.start_kill();
		Err(Error::WorkerCreationFailed(format!(
			"debugging endpoint not reachable on port {port}: {last_error}"
		)))
	}
}

struct ChromiumWorker {
	port: u16,
	child: Mutex<Child>,
	user_data_dir: PathBuf,
}

#[async_trait]
impl WorkerHandle for ChromiumWorker {
	async fn open_session(&self, _policy: &SessionPolicy) -> Result<Box<dyn SessionHandle>> {
		let client = http_client()?;
		// Chromium requires PUT for target creation.
		let response = client
			.put(format!("http://127.0.0.1:{}/json/new?about:blank", self.port))
			.send()
			.await
			.map_err(|err| Error::SessionSetupFailed(format!("target creation request failed: {err}")))?;
		if !response.status().is_success() {
			return Err(Error::SessionSetupFailed(format!(
				"target creation returned status {}",
				response.status()
			)));
		}
		let target: TargetInfo = response
			.json()
			.await
			.map_err(|err| Error::SessionSetupFailed(format!("failed to parse target info: {err}")))?;

		let endpoint = target
			.web_socket_debugger_url
			.unwrap_or_else(|| format!("ws://127.0.0.1:{}/devtools/page/{}", self.port, target.id));
		url::Url::parse(&endpoint)
			.map_err(|err| Error::SessionSetupFailed(format!("invalid target endpoint {endpoint}: {err}")))?;
		Ok(Box::new(ChromiumSession {
			port: self.port,
			target_id: target.id,
			endpoint,
		}))
	}

	fn is_alive(&self) -> bool {
		self.child.lock().try_wait().map(|status| status.is_none()).unwrap_or(false)
	}

	async fn close(&self) {
		if let Err(err) = self.child.lock().start_kill() {
			debug!(target = "pq.backend", port = self.port, error = %err, "worker already gone on close");
		}
		if let Err(err) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
			debug!(target = "pq.backend", error = %err, "user data dir cleanup failed");
		}
	}
}

struct ChromiumSession {
	port: u16,
	target_id: String,
	endpoint: String,
}

#[async_trait]
impl SessionHandle for ChromiumSession {
	fn endpoint(&self) -> &str {
		&self.endpoint
	}

	async fn close(&self) -> Result<()> {
		let client = http_client()?;
		let response = client
			.get(format!("http://127.0.0.1:{}/json/close/{}", self.port, self.target_id))
			.send()
			.await
			.map_err(|err| Error::SessionSetupFailed(format!("target close request failed: {err}")))?;
		if !response.status().is_success() {
			warn!(
				target = "pq.backend",
				target_id = %self.target_id,
				status = %response.status(),
				"target close returned unexpected status"
			);
		}
		Ok(())
	}
}

/// `/json/version` response subset.
#[derive(Debug, Deserialize)]
struct VersionInfo {
	#[serde(rename = "Browser")]
	browser: Option<String>,
}

/// `/json/new` response subset.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
	id: String,
	web_socket_debugger_url: Option<String>,
}

async fn fetch_version(port: u16) -> Result<VersionInfo> {
	let client = http_client()?;
	let mut last_error = "no response".to_string();

	for url in [
		format!("http://127.0.0.1:{port}/json/version"),
		format!("http://localhost:{port}/json/version"),
	] {
		let response = match client.get(&url).send().await {
			Ok(response) => response,
			Err(err) => {
				last_error = err.to_string();
				continue;
			}
		};
		if !response.status().is_success() {
			last_error = format!("unexpected status {}", response.status());
			continue;
		}
		return response
			.json()
			.await
			.map_err(|err| Error::WorkerCreationFailed(format!("failed to parse version info: {err}")));
	}

	Err(Error::WorkerCreationFailed(format!(
		"failed to reach debugging endpoint on port {port}: {last_error}"
	)))
}

fn http_client() -> Result<reqwest::Client> {
	reqwest::Client::builder()
		.timeout(HTTP_TIMEOUT)
		.build()
		.map_err(|err| Error::WorkerCreationFailed(format!("failed to create HTTP client: {err}")))
}

/// Picks a free port by binding to zero and releasing it. The browser
/// binds it a moment later; the gap is accepted.
fn ephemeral_port() -> Result<u16> {
	let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
		.map_err(|err| Error::WorkerCreationFailed(format!("failed to reserve a port: {err}")))?;
	let port = listener
		.local_addr()
		.map_err(|err| Error::WorkerCreationFailed(format!("failed to read reserved port: {err}")))?
		.port();
	Ok(port)
}

fn find_browser_executable() -> Option<PathBuf> {
	let candidates: &[&str] = if cfg!(target_os = "macos") {
		&[
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
		]
	} else if cfg!(target_os = "windows") {
		&["chrome.exe", "msedge.exe", "chromium.exe", "brave.exe"]
	} else {
		&[
			"google-chrome-stable",
			"google-chrome",
			"chromium-browser",
			"chromium",
			"brave-browser",
			"/usr/bin/google-chrome",
			"/usr/bin/chromium",
			"/snap/bin/chromium",
		]
	};

	for candidate in candidates {
		if candidate.starts_with('/') || candidate.contains('\\') {
			let path = PathBuf::from(candidate);
			if path.exists() {
				return Some(path);
			}
		} else if let Ok(path) = which::which(candidate) {
			return Some(path);
		}
	}

	None
}
