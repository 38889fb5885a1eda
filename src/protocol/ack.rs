use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{COMPLETE_TOKEN, ERROR_TOKEN};
use crate::link::Link;

/// How long a sender waits for the driver to acknowledge a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AckPolicy {
    pub retries: u32,
    pub poll_ms: u64,
}

impl Default for AckPolicy {
    fn default() -> Self {
        AckPolicy {
            retries: 1000,
            poll_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The driver reported completion; carries the full line.
    Complete(String),
    /// The driver reported an error; pending input has been flushed.
    Failed(String),
    /// No verdict within the retry budget. The frame counts as delivered.
    TimedOut,
}

/// Poll the link's line side channel until the driver answers.
///
/// Lines that carry neither token are driver chatter and are logged. Only
/// transport failures are returned as errors.
pub fn wait_for_ack(link: &mut dyn Link, policy: &AckPolicy) -> io::Result<AckOutcome> {
    let poll = Duration::from_millis(policy.poll_ms);
    for _ in 0..policy.retries {
        let Some(line) = link.read_line(poll)? else {
            continue;
        };
        let line = line.trim_end().to_string();
        if line.starts_with(COMPLETE_TOKEN) {
            debug!(line = %line, "Command acknowledged");
            return Ok(AckOutcome::Complete(line));
        }
        if line.starts_with(ERROR_TOKEN) {
            warn!(line = %line, "Driver reported an error");
            link.clear_input()?;
            return Ok(AckOutcome::Failed(line));
        }
        debug!(line = %line, "driver");
    }
    warn!(
        retries = policy.retries,
        poll_ms = policy.poll_ms,
        "Timed out waiting for acknowledgement"
    );
    Ok(AckOutcome::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLink;

    const QUICK: AckPolicy = AckPolicy {
        retries: 5,
        poll_ms: 1,
    };

    #[test]
    fn test_complete_after_chatter() {
        let mut link = MockLink::default();
        link.push_inbound(b"booting\r\n##COMPLETE##: Status\r\n");
        assert_eq!(
            wait_for_ack(&mut link, &QUICK).unwrap(),
            AckOutcome::Complete("##COMPLETE##: Status".to_string())
        );
    }

    #[test]
    fn test_error_line_aborts_and_flushes() {
        let mut link = MockLink::default();
        link.push_inbound(b"### bad crc\n##COMPLETE##: Status\n");
        assert_eq!(
            wait_for_ack(&mut link, &QUICK).unwrap(),
            AckOutcome::Failed("### bad crc".to_string())
        );
        assert_eq!(link.inbound_len(), 0);
    }

    #[test]
    fn test_silence_times_out() {
        let mut link = MockLink::default();
        assert_eq!(wait_for_ack(&mut link, &QUICK).unwrap(), AckOutcome::TimedOut);
        assert_eq!(link.line_polls(), 5);
    }
}
