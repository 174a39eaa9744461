//! Live application process - a generated project running as a child
//! process, probed over HTTP

use harness_common::{ProcessRun, ProcessSpec, RetryPolicy};
use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::error::{ensure, E2eError, E2eResult};
use crate::webdriver::BrowserSession;

const STARTED_MARKER: &str = "Application started.";

/// Handle to a running generated application
pub struct AppProcess {
    process: ProcessRun,
    listening_uris: Vec<String>,
    client: reqwest::Client,
    probe: RetryPolicy,
}

impl AppProcess {
    /// Start the application and wait until it reports the addresses it
    /// bound to.
    pub async fn start(spec: ProcessSpec, http: &HttpConfig) -> E2eResult<Self> {
        info!("Running ASP.NET application...");
        let process = spec.start()?;

        let listening_uris = wait_for_listening(&process, http).await?;
        info!("Application listening on {}", listening_uris.join(", "));

        // Generated apps use development certificates
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .timeout(http.request_timeout())
            .build()?;

        Ok(Self {
            process,
            listening_uris,
            client,
            probe: http.probe_policy(),
        })
    }

    pub fn process(&self) -> &ProcessRun {
        &self.process
    }

    pub fn listening_uris(&self) -> &[String] {
        &self.listening_uris
    }

    /// First plain-HTTP address, or the first address of any scheme
    pub fn base_uri(&self) -> &str {
        self.listening_uris
            .iter()
            .find(|uri| uri.starts_with("http://"))
            .or_else(|| self.listening_uris.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub async fn assert_ok(&self, path: &str) -> E2eResult<()> {
        self.assert_status(path, StatusCode::OK, None).await
    }

    pub async fn assert_not_found(&self, path: &str) -> E2eResult<()> {
        self.assert_status(path, StatusCode::NOT_FOUND, None).await
    }

    /// GET `path` and check the status code and, optionally, that the
    /// content type starts with `content_type`.
    ///
    /// Transport errors are retried; any HTTP response is final.
    pub async fn assert_status(&self, path: &str, expected: StatusCode, content_type: Option<&str>) -> E2eResult<()> {
        let url = self.url(path);
        let url_ref = url.as_str();
        let client = &self.client;

        let response = self
            .probe
            .run(
                move |attempt| async move {
                    let sent = client.get(url_ref).send().await;
                    if let Err(e) = &sent {
                        debug!("Request to {} failed on attempt {}: {}", url_ref, attempt, e);
                    }
                    sent
                },
                |sent| sent.is_ok(),
            )
            .await
            .unwrap_or_else(|exhausted| {
                warn!("Giving up on {} after {} attempts", url_ref, exhausted.attempts);
                exhausted.into_last()
            })?;

        let status = response.status();
        let actual_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        ensure(status == expected, || {
            format!(
                "Expected {} for GET {} but got {}.\n{}",
                expected,
                url,
                status,
                self.process.formatted_output()
            )
        })?;

        if let Some(content_type) = content_type {
            let matches = actual_type
                .as_deref()
                .map(|actual| actual.starts_with(content_type))
                .unwrap_or(false);
            ensure(matches, || {
                format!(
                    "Expected content type '{}' for GET {} but got '{}'",
                    content_type,
                    url,
                    actual_type.as_deref().unwrap_or("<none>")
                )
            })?;
        }

        Ok(())
    }

    /// Point `browser` at the application's root
    pub async fn visit_in_browser(&self, browser: &BrowserSession) -> E2eResult<()> {
        info!("Visiting {} in the browser", self.base_uri());
        browser.goto(self.base_uri()).await
    }

    /// Kill the application's process tree
    pub fn stop(&self) {
        self.process.kill();
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_uri().trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

impl Drop for AppProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Startup {
    Waiting,
    Ready(Vec<String>),
    Exited,
}

async fn wait_for_listening(process: &ProcessRun, http: &HttpConfig) -> E2eResult<Vec<String>> {
    let outcome = http
        .listen_policy()
        .run(
            move |_| async move {
                let output = process.output();
                let uris = parse_listening_uris(&output);
                if !uris.is_empty() && output.contains(STARTED_MARKER) {
                    Startup::Ready(uris)
                } else if process.has_exited() {
                    Startup::Exited
                } else {
                    Startup::Waiting
                }
            },
            |state| !matches!(state, Startup::Waiting),
        )
        .await;

    match outcome {
        Ok(Startup::Ready(uris)) => Ok(uris),
        Ok(_) => Err(E2eError::AppStartup(format!(
            "Application exited before it started listening.\n{}",
            process.formatted_output()
        ))),
        Err(_) => {
            // Some hosts never print the started marker; take what was bound
            let uris = parse_listening_uris(&process.output());
            if uris.is_empty() {
                Err(E2eError::AppStartup(format!(
                    "Application never reported a listening address.\n{}",
                    process.formatted_output()
                )))
            } else {
                Ok(uris)
            }
        }
    }
}

/// Addresses from `Now listening on: <uri>` startup lines, in order
pub fn parse_listening_uris(output: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r"Now listening on: (?P<uri>\S+)") else {
        return Vec::new();
    };

    let mut uris: Vec<String> = Vec::new();
    for caps in re.captures_iter(output) {
        let uri = caps["uri"].trim_end_matches('/').to_string();
        if !uris.contains(&uri) {
            uris.push(uri);
        }
    }
    uris
}
