//! Out-of-process engine reached over a JSON-lines stdin/stdout protocol.
//!
//! Every handle is its own bridge process, started with
//! `<command> <args...> --matrix <dir>`. The process announces itself with
//! `{"type":"ready"}` and then answers one `disambiguate` request per line.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use senseindex_shared::{BridgeConfig, Result, SenseIndexError};

use crate::contract::{
    DisambiguationOptions, DisambiguationOutcome, EngineFactory, EngineHandle, SentenceResult,
};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Disambiguate {
        id: String,
        text: &'a str,
        max_variants_per_sentence: usize,
    },
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result {
        id: String,
        #[serde(default)]
        sentences: Vec<SentenceResult>,
    },
    Error {
        id: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Factory for bridge-backed handles.
#[derive(Debug, Clone)]
pub struct BridgeEngineFactory {
    config: BridgeConfig,
    matrix_dir: PathBuf,
}

impl BridgeEngineFactory {
    /// Validate the launcher settings and the matrix directory.
    #[instrument(skip_all, fields(matrix_dir = %matrix_dir.display()))]
    pub fn open(config: &BridgeConfig, matrix_dir: &Path) -> Result<Self> {
        if config.command.trim().is_empty() {
            return Err(SenseIndexError::config("bridge command is empty"));
        }

        if !matrix_dir.is_dir() {
            return Err(SenseIndexError::config(format!(
                "matrix directory {} does not exist or is not a directory",
                matrix_dir.display()
            )));
        }

        // Readability check; the bridge process loads the actual data.
        std::fs::read_dir(matrix_dir).map_err(|e| {
            SenseIndexError::config(format!(
                "matrix directory {} is not readable: {e}",
                matrix_dir.display()
            ))
        })?;

        info!(command = %config.command, "bridge engine factory ready");

        Ok(Self {
            config: config.clone(),
            matrix_dir: matrix_dir.to_path_buf(),
        })
    }
}

impl EngineFactory for BridgeEngineFactory {
    type Handle = BridgeHandle;

    fn open_handle(&self) -> Result<BridgeHandle> {
        BridgeHandle::spawn(&self.config, &self.matrix_dir)
    }
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Handle to one spawned bridge subprocess.
///
/// Any transport failure (EOF, broken pipe, unparsable or out-of-order
/// reply) leaves the line protocol out of sync, so the handle marks itself
/// broken and answers every later call with [`SenseIndexError::Resource`].
pub struct BridgeHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
    broken: Option<String>,
}

impl BridgeHandle {
    /// Spawn the bridge subprocess and wait for its ready signal.
    fn spawn(config: &BridgeConfig, matrix_dir: &Path) -> Result<Self> {
        info!(cmd = %config.command, "spawning engine bridge");

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .arg("--matrix")
            .arg(matrix_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()); // Bridge logs go to parent stderr
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            SenseIndexError::resource(format!(
                "failed to spawn bridge: {e}. Is `{}` installed?",
                config.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SenseIndexError::resource("failed to capture bridge stdin"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SenseIndexError::resource("failed to capture bridge stdout"))?;

        let mut handle = Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            request_counter: 0,
            broken: None,
        };

        handle.wait_for_ready()?;

        Ok(handle)
    }

    /// Whether a transport failure has made this handle unusable.
    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// Wait for the bridge to send its "ready" message.
    fn wait_for_ready(&mut self) -> Result<()> {
        let line = self
            .read_line()
            .map_err(|e| SenseIndexError::resource(format!("bridge handshake failed: {e}")))?;

        match serde_json::from_str::<ResponseMessage>(line.trim()) {
            Ok(ResponseMessage::Ready) => {
                debug!(pid = self.child.id(), "bridge is ready");
                Ok(())
            }
            _ => Err(SenseIndexError::resource(format!(
                "expected ready message, got: {}",
                truncate(&line, 200)
            ))),
        }
    }

    /// Read one response line. An empty read means the bridge went away.
    fn read_line(&mut self) -> std::result::Result<String, String> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| format!("bridge read error: {e}"))?;

        if line.is_empty() {
            return Err("bridge closed stdout unexpectedly".to_string());
        }
        Ok(line)
    }

    fn send(&mut self, request: &RequestMessage<'_>) -> std::result::Result<(), String> {
        let json =
            serde_json::to_string(request).map_err(|e| format!("failed to serialize request: {e}"))?;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| "bridge stdin already closed".to_string())?;

        writeln!(stdin, "{json}").map_err(|e| format!("failed to write to bridge stdin: {e}"))?;
        stdin
            .flush()
            .map_err(|e| format!("failed to flush bridge stdin: {e}"))
    }

    /// One request/response round trip at the transport level.
    fn exchange(&mut self, request: &RequestMessage<'_>) -> std::result::Result<ResponseMessage, String> {
        self.send(request)?;
        let line = self.read_line()?;
        serde_json::from_str(line.trim()).map_err(|e| {
            format!(
                "invalid bridge response: {e} (got: {})",
                truncate(&line, 200)
            )
        })
    }

    /// Mark the handle unusable and build the error for the current call.
    fn poison(&mut self, reason: String) -> SenseIndexError {
        warn!(pid = self.child.id(), %reason, "bridge handle is no longer usable");
        let err = SenseIndexError::resource(format!("bridge handle broken: {reason}"));
        self.broken = Some(reason);
        err
    }
}

impl EngineHandle for BridgeHandle {
    fn disambiguate(
        &mut self,
        text: &str,
        options: &DisambiguationOptions,
    ) -> Result<DisambiguationOutcome> {
        if let Some(reason) = &self.broken {
            return Err(SenseIndexError::resource(format!(
                "bridge handle broken: {reason}"
            )));
        }

        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        let request = RequestMessage::Disambiguate {
            id: id.clone(),
            text,
            max_variants_per_sentence: options.max_variants_per_sentence,
        };
        let msg = match self.exchange(&request) {
            Ok(msg) => msg,
            Err(reason) => return Err(self.poison(reason)),
        };

        match msg {
            ResponseMessage::Result {
                id: resp_id,
                sentences,
            } if resp_id == id => Ok(DisambiguationOutcome { sentences }),
            ResponseMessage::Error { id: resp_id, error } if resp_id == id => {
                Err(SenseIndexError::engine(error))
            }
            ResponseMessage::Result { id: resp_id, .. }
            | ResponseMessage::Error { id: resp_id, .. } => {
                Err(self.poison(format!("bridge answered {resp_id}, expected {id}")))
            }
            ResponseMessage::Ready => {
                Err(self.poison("unexpected ready message during disambiguation".to_string()))
            }
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if self.broken.is_none() {
            if let Err(e) = self.send(&RequestMessage::Shutdown) {
                debug!(error = %e, "bridge shutdown request not delivered");
            }
        } else if let Err(e) = self.child.kill() {
            debug!(error = %e, "broken bridge already exited");
        }
        // Closing stdin lets a bridge that ignores shutdown see EOF.
        drop(self.stdin.take());

        match self.child.wait() {
            Ok(status) => debug!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_message_serializes_correctly() {
        let msg = RequestMessage::Disambiguate {
            id: "req-1".into(),
            text: "title 1",
            max_variants_per_sentence: 3,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"disambiguate""#));
        assert!(json.contains(r#""id":"req-1""#));
        assert!(json.contains(r#""text":"title 1""#));
        assert!(json.contains(r#""max_variants_per_sentence":3"#));
    }

    #[test]
    fn shutdown_message_serializes_correctly() {
        let json = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn response_message_deserializes_result() {
        let json = r#"{"type":"result","id":"req-1","sentences":[{"variants":[{"terms":[{"word":"title","sense":"n_01"},{"word":"1"}]}]}]}"#;
        match serde_json::from_str::<ResponseMessage>(json).unwrap() {
            ResponseMessage::Result { id, sentences } => {
                assert_eq!(id, "req-1");
                assert_eq!(sentences[0].variants[0].to_string(), "title_n_01 1");
            }
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[test]
    fn response_message_deserializes_error() {
        let json = r#"{"type":"error","id":"req-2","error":"matrix not loaded"}"#;
        match serde_json::from_str::<ResponseMessage>(json).unwrap() {
            ResponseMessage::Error { id, error } => {
                assert_eq!(id, "req-2");
                assert_eq!(error, "matrix not loaded");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 200), "short");
    }

    #[test]
    fn open_rejects_missing_matrix_directory() {
        let err = BridgeEngineFactory::open(
            &BridgeConfig::default(),
            Path::new("/definitely/not/a/matrix/dir"),
        )
        .unwrap_err();
        assert!(matches!(err, SenseIndexError::Config { .. }));
    }

    #[test]
    fn open_rejects_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            command: "  ".into(),
            ..BridgeConfig::default()
        };
        let err = BridgeEngineFactory::open(&config, dir.path()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_command_is_a_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            command: "senseindex-no-such-bridge-binary".into(),
            ..BridgeConfig::default()
        };
        let factory = BridgeEngineFactory::open(&config, dir.path()).unwrap();
        let err = factory.open_handle().err().unwrap();
        assert!(matches!(err, SenseIndexError::Resource(_)));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        /// Answers every request with a fixed two-term variant, except
        /// `boom`, which gets an error reply.
        const ECHO_BRIDGE: &str = r#"#!/bin/sh
echo '{"type":"ready"}'
while read -r line; do
  id=$(echo "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
  case "$line" in
    *'"type":"shutdown"'*) exit 0 ;;
    *'"text":"boom"'*) echo "{\"type\":\"error\",\"id\":\"$id\",\"error\":\"engine exploded\"}" ;;
    *) echo "{\"type\":\"result\",\"id\":\"$id\",\"sentences\":[{\"variants\":[{\"terms\":[{\"word\":\"desert\",\"sense\":\"n_01\"},{\"word\":\"sky\"}]}]}]}" ;;
  esac
done
"#;

        const SILENT_BRIDGE: &str = "#!/bin/sh\necho 'loading matrices...'\n";

        /// Like `ECHO_BRIDGE`, but dies with status 3 when asked about `crash`.
        const CRASHING_BRIDGE: &str = r#"#!/bin/sh
echo '{"type":"ready"}'
while read -r line; do
  id=$(echo "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
  case "$line" in
    *'"type":"shutdown"'*) exit 0 ;;
    *'"text":"crash"'*) exit 3 ;;
    *'"text":"skip"'*) echo "{\"type\":\"result\",\"id\":\"req-999\",\"sentences\":[]}" ;;
    *) echo "{\"type\":\"result\",\"id\":\"$id\",\"sentences\":[]}" ;;
  esac
done
"#;

        fn factory_for(script: &str) -> (tempfile::TempDir, BridgeEngineFactory) {
            let dir = tempfile::tempdir().unwrap();
            let script_path = dir.path().join("bridge.sh");
            std::fs::write(&script_path, script).unwrap();

            let config = BridgeConfig {
                command: "sh".into(),
                args: vec![script_path.to_string_lossy().to_string()],
                working_dir: None,
            };
            let factory = BridgeEngineFactory::open(&config, dir.path()).unwrap();
            (dir, factory)
        }

        #[test]
        fn round_trip_through_bridge_process() {
            let (_dir, factory) = factory_for(ECHO_BRIDGE);
            let mut handle = factory.open_handle().unwrap();

            let options = DisambiguationOptions::default();
            let first = handle.disambiguate("Desert Sky", &options).unwrap();
            let second = handle.disambiguate("Desert Sky again", &options).unwrap();

            assert_eq!(first.sentences[0].variants[0].to_string(), "desert_n_01 sky");
            assert_eq!(first, second);
        }

        #[test]
        fn bridge_error_reply_is_an_engine_error() {
            let (_dir, factory) = factory_for(ECHO_BRIDGE);
            let mut handle = factory.open_handle().unwrap();

            let err = handle
                .disambiguate("boom", &DisambiguationOptions::default())
                .unwrap_err();
            assert!(matches!(err, SenseIndexError::Engine(ref m) if m == "engine exploded"));
        }

        #[test]
        fn dead_bridge_breaks_the_handle() {
            let (_dir, factory) = factory_for(CRASHING_BRIDGE);
            let mut handle = factory.open_handle().unwrap();
            let options = DisambiguationOptions::default();

            assert!(handle.disambiguate("fine", &options).is_ok());

            let err = handle.disambiguate("crash", &options).unwrap_err();
            assert!(matches!(err, SenseIndexError::Resource(_)));
            assert!(handle.is_broken());

            let again = handle.disambiguate("fine", &options).unwrap_err();
            assert!(matches!(again, SenseIndexError::Resource(_)));
        }

        #[test]
        fn out_of_order_reply_breaks_the_handle() {
            let (_dir, factory) = factory_for(CRASHING_BRIDGE);
            let mut handle = factory.open_handle().unwrap();

            let err = handle
                .disambiguate("skip", &DisambiguationOptions::default())
                .unwrap_err();
            assert!(matches!(err, SenseIndexError::Resource(ref m) if m.contains("req-999")));
            assert!(handle.is_broken());
        }

        #[test]
        fn error_reply_leaves_the_handle_usable() {
            let (_dir, factory) = factory_for(ECHO_BRIDGE);
            let mut handle = factory.open_handle().unwrap();
            let options = DisambiguationOptions::default();

            assert!(handle.disambiguate("boom", &options).is_err());
            assert!(!handle.is_broken());
            assert!(handle.disambiguate("Desert Sky", &options).is_ok());
        }

        #[test]
        fn missing_ready_message_is_a_resource_error() {
            let (_dir, factory) = factory_for(SILENT_BRIDGE);
            let err = factory.open_handle().err().unwrap();
            assert!(matches!(err, SenseIndexError::Resource(_)));
        }
    }
}
