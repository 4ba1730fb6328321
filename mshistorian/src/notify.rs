use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use mshistory::{Notifier, NotifyError};

use crate::args::NotifyMode;

/// Hands messages to a sendmail-compatible program, which reads the recipients
/// from the message headers.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    pub program: PathBuf,
    pub from_address: String,
}

impl SendmailNotifier {
    pub fn new(program: PathBuf, from_address: String) -> Self {
        Self {
            program,
            from_address,
        }
    }

    pub fn format_message(&self, recipients: &[String], subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}",
            self.from_address,
            recipients.join(", "),
            subject,
            body
        )
    }
}

impl Notifier for SendmailNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            debug!("No recipients, not sending \"{subject}\"");
            return Ok(());
        }
        let mut child = Command::new(&self.program)
            .args(["-t", "-oi"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| {
                NotifyError::Unavailable(format!("{}: {e}", self.program.display()))
            })?;
        let written = match child.stdin.take() {
            Some(mut stdin) => {
                stdin.write_all(self.format_message(recipients, subject, body).as_bytes())
            }
            None => Ok(()),
        };
        let status = child.wait()?;
        written?;
        if status.success() {
            info!("Sent \"{subject}\" to {}", recipients.join(", "));
            Ok(())
        } else {
            Err(NotifyError::Rejected(format!(
                "{} exited with {status}",
                self.program.display()
            )))
        }
    }
}

/// Writes messages to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        info!("{subject} (for {})\n{body}", recipients.join(", "));
        Ok(())
    }
}

/// Drops messages
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietNotifier;

impl Notifier for QuietNotifier {
    fn send(&self, _recipients: &[String], subject: &str, _body: &str) -> Result<(), NotifyError> {
        debug!("Notifications are off, dropping \"{subject}\"");
        Ok(())
    }
}

pub fn make_notifier(
    mode: NotifyMode,
    sendmail_path: &Path,
    from_address: &str,
) -> Box<dyn Notifier> {
    match mode {
        NotifyMode::Sendmail => Box::new(SendmailNotifier::new(
            sendmail_path.to_path_buf(),
            from_address.to_string(),
        )),
        NotifyMode::Log => Box::new(LogNotifier),
        NotifyMode::Quiet => Box::new(QuietNotifier),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_message_headers() {
        let notifier = SendmailNotifier::new("/usr/sbin/sendmail".into(), "qc@example.org".into());
        let text = notifier.format_message(
            &["a@example.org".to_string(), "b@example.org".to_string()],
            "Warning: QC for QEPLUS",
            "Hi,\n",
        );
        assert_eq!(
            text,
            "From: qc@example.org\nTo: a@example.org, b@example.org\nSubject: Warning: QC for QEPLUS\n\nHi,\n"
        );
    }

    #[test]
    fn test_missing_program() {
        let notifier = SendmailNotifier::new(
            "/definitely/not/a/sendmail".into(),
            "qc@example.org".into(),
        );
        let err = notifier
            .send(&["a@example.org".to_string()], "subject", "body")
            .unwrap_err();
        assert!(matches!(err, NotifyError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_program_exits_early() {
        // `false` never reads the message, so the write may also hit a closed pipe
        let notifier = SendmailNotifier::new("false".into(), "qc@example.org".into());
        let body = "range = 15000 +/- 70\n".repeat(20_000);
        let err = notifier
            .send(&["a@example.org".to_string()], "subject", &body)
            .unwrap_err();
        assert!(matches!(
            err,
            NotifyError::Rejected(_) | NotifyError::IOError(_)
        ));
    }
}
