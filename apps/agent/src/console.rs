//! Line protocol read from stdin by `mirror-agent run`.
//!
//! Each non-empty line is either a JSON [`ChangeDraft`] or one of the
//! colon-prefixed directives below.
//!
//! ```text
//! {"kind":"UPDATE","entityType":"task","entityId":"t-1","field":"done","newValue":true}
//! :sync       pull everything after the stored cursor
//! :retry      drain the pending queue now
//! :status     log the current SyncStatus
//! :snapshot   print the snapshot as JSON on stdout
//! :clear      wipe local state
//! :online     network is back, reconnect now
//! :offline    network is gone, stop reconnecting
//! :quit       stop the agent
//! ```

use mirror_core::ChangeDraft;

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Track(Box<ChangeDraft>),
    Sync,
    Retry,
    Status,
    Snapshot,
    Clear,
    Online,
    Offline,
    Quit,
}

/// Parses a line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if let Some(directive) = line.strip_prefix(':') {
        let input = match directive.trim() {
            "sync" => Input::Sync,
            "retry" => Input::Retry,
            "status" => Input::Status,
            "snapshot" => Input::Snapshot,
            "clear" => Input::Clear,
            "online" => Input::Online,
            "offline" => Input::Offline,
            "quit" | "exit" => Input::Quit,
            other => anyhow::bail!("Unknown directive ':{}'", other),
        };
        return Ok(Some(input));
    }

    let draft: ChangeDraft = serde_json::from_str(line)?;
    Ok(Some(Input::Track(Box::new(draft))))
}
