//! audioguard-cli: command-line client for the AudioGuard HTTP API
//!
//! # Subcommands
//! - `status`: show server health
//! - `check`: upload history and remaining quota for the session
//! - `upload <file> [--json]`: submit an audio file for AI detection
//!
//! The session is carried in the `audioguard_sid` cookie. Pass `--session` (or set
//! `AUDIOGUARD_SESSION`) to reuse one; a newly issued session id is printed to stderr.

use std::path::Path;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";
const DEFAULT_COOKIE_NAME: &str = "audioguard_sid";
/// Polling on the server side can run for minutes.
const UPLOAD_TIMEOUT_SECS: u64 = 15 * 60;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "audioguard-cli",
    version,
    about = "AudioGuard: detect AI-generated audio from the command line"
)]
struct Cli {
    /// AudioGuard HTTP server URL (overrides AUDIOGUARD_HTTP_URL env var)
    #[arg(long, env = "AUDIOGUARD_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Existing session id to send as the session cookie
    #[arg(long, env = "AUDIOGUARD_SESSION")]
    session: Option<String>,

    /// Name of the session cookie
    #[arg(long, default_value = DEFAULT_COOKIE_NAME)]
    cookie_name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show AudioGuard server status
    Status,

    /// Show whether this session has uploaded and how many uploads remain
    Check,

    /// Upload an audio file (MP3, WAV or OGG) for AI detection
    Upload {
        /// Path to the audio file
        file: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CheckUploadResponse {
    #[serde(rename = "hasUploaded")]
    pub has_uploaded: bool,
    #[serde(rename = "uploadsRemaining")]
    pub uploads_remaining: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "ISAI")]
    pub is_ai: bool,
    pub confidence: f64,
    #[serde(rename = "uploadsRemaining")]
    pub uploads_remaining: Option<u32>,
}

/// MIME type the server accepts for a file extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "ogg" | "oga" => Some("audio/ogg"),
        _ => None,
    }
}

/// Session id out of a `Set-Cookie` header value, if it names our cookie.
pub fn session_from_set_cookie(value: &str, cookie_name: &str) -> Option<String> {
    let (name, rest) = value.split(';').next()?.split_once('=')?;
    if name.trim() != cookie_name {
        return None;
    }
    Some(rest.trim().to_string())
}

pub fn format_remaining(remaining: Option<u32>) -> String {
    match remaining {
        Some(n) => n.to_string(),
        None => "unlimited".to_string(),
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Session<'a> {
    id: Option<&'a str>,
    cookie_name: &'a str,
}

impl Session<'_> {
    fn attach(&self, req: RequestBuilder) -> RequestBuilder {
        match self.id {
            Some(id) => req.header(COOKIE, format!("{}={}", self.cookie_name, id)),
            None => req,
        }
    }

    /// Report a newly issued session so the caller can reuse it.
    fn report_issued(&self, resp: &Response) {
        let issued = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .find_map(|h| session_from_set_cookie(h, self.cookie_name));
        if let Some(id) = issued {
            eprintln!("audioguard-cli: new session {} (reuse with --session)", id);
        }
    }
}

fn error_message(resp: Response) -> String {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(|s| s.to_string()))
        .unwrap_or(body);
    format!("server returned {}: {}", status, message)
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("AudioGuard server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:           {}", body["version"].as_str().unwrap_or("?"));
            println!("Result store:      {}", body["store"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("audioguard-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("audioguard-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Show upload history via GET /api/check-upload.
fn do_check(server: &str, session: &Session) -> anyhow::Result<()> {
    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

    let url = format!("{}/api/check-upload", server);
    let resp = match session.attach(client.get(&url)).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("audioguard-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    session.report_issued(&resp);
    if !resp.status().is_success() {
        eprintln!("audioguard-cli: {}", error_message(resp));
        std::process::exit(1);
    }

    let check: CheckUploadResponse = resp.json()?;
    println!("Has uploaded:      {}", if check.has_uploaded { "yes" } else { "no" });
    println!("Uploads remaining: {}", format_remaining(check.uploads_remaining));
    Ok(())
}

/// Submit a file via POST /api/upload and print the verdict.
fn do_upload(server: &str, session: &Session, file: &str, json_output: bool) -> anyhow::Result<()> {
    let path = Path::new(file);
    let mime = mime_for_path(path).ok_or_else(|| {
        anyhow::anyhow!("{}: unsupported extension (expected .mp3, .wav or .ogg)", file)
    })?;
    let data = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let part = multipart::Part::bytes(data)
        .file_name(file_name)
        .mime_str(mime)?;
    let form = multipart::Form::new().part("audio", part);

    let client = Client::builder()
        .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
        .build()?;
    let url = format!("{}/api/upload", server);

    let resp = match session.attach(client.post(&url)).multipart(form).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("audioguard-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    session.report_issued(&resp);
    if !resp.status().is_success() {
        eprintln!("audioguard-cli: {}", error_message(resp));
        std::process::exit(1);
    }

    if json_output {
        let body: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let verdict: UploadResponse = resp.json()?;
    println!(
        "Verdict:           {}",
        if verdict.is_ai { "AI-generated" } else { "human" }
    );
    println!("Confidence:        {}", verdict.confidence);
    println!("Uploads remaining: {}", format_remaining(verdict.uploads_remaining));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let session = Session {
        id: cli.session.as_deref().filter(|s| !s.is_empty()),
        cookie_name: &cli.cookie_name,
    };

    let result = match &cli.command {
        Commands::Status => do_status(&server),
        Commands::Check => do_check(&server, &session),
        Commands::Upload { file, json } => do_upload(&server, &session, file, *json),
    };

    if let Err(e) = result {
        eprintln!("audioguard-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: MIME type follows the extension, case-insensitively
    // ========================================================================
    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("song.mp3")), Some("audio/mpeg"));
        assert_eq!(mime_for_path(Path::new("/tmp/Take 2.WAV")), Some("audio/wav"));
        assert_eq!(mime_for_path(Path::new("loop.ogg")), Some("audio/ogg"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    // ========================================================================
    // TEST 2: session id is read only from our cookie
    // ========================================================================
    #[test]
    fn test_session_from_set_cookie() {
        let header = "audioguard_sid=3f1c; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400";
        assert_eq!(
            session_from_set_cookie(header, "audioguard_sid").as_deref(),
            Some("3f1c")
        );
        assert_eq!(session_from_set_cookie("other=1; Path=/", "audioguard_sid"), None);
        assert_eq!(session_from_set_cookie("garbage", "audioguard_sid"), None);
    }

    // ========================================================================
    // TEST 3: response payloads deserialize with the wire field names
    // ========================================================================
    #[test]
    fn test_upload_response_wire_names() {
        let resp: UploadResponse = serde_json::from_str(
            r#"{"ISAI": true, "confidence": 87.0, "uploadsRemaining": 0}"#,
        )
        .unwrap();
        assert!(resp.is_ai);
        assert_eq!(resp.confidence, 87.0);
        assert_eq!(resp.uploads_remaining, Some(0));

        let check: CheckUploadResponse =
            serde_json::from_str(r#"{"hasUploaded": false, "uploadsRemaining": null}"#).unwrap();
        assert!(!check.has_uploaded);
        assert_eq!(format_remaining(check.uploads_remaining), "unlimited");
    }
}
