//! Failure artifacts for offline diagnosis.
//!
//! When element location exhausts every strategy, the driver writes a
//! full-page screenshot and a structured dump of candidate elements here.
//! These files are outputs only; nothing in the system reads them back.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::browser::locator::CandidateElement;

#[derive(Debug, Clone)]
pub struct DiagnosticsSink {
    dir: PathBuf,
}

#[derive(Debug)]
pub struct DiagnosticArtifacts {
    pub screenshot: Option<PathBuf>,
    pub elements: PathBuf,
}

impl DiagnosticsSink {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("diagnostics"),
        }
    }

    /// Write the artifacts for one locate failure. The screenshot is
    /// optional because capturing it is itself best-effort.
    pub fn capture_failure(
        &self,
        label: &str,
        screenshot: Option<&[u8]>,
        candidates: &[CandidateElement],
    ) -> std::io::Result<DiagnosticArtifacts> {
        fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let slug = sanitize(label);

        let screenshot_path = match screenshot {
            Some(bytes) => {
                let path = self.dir.join(format!("{stamp}-{slug}.png"));
                fs::write(&path, bytes)?;
                Some(path)
            }
            None => None,
        };

        let elements = self.dir.join(format!("{stamp}-{slug}-elements.json"));
        let json = serde_json::to_string_pretty(candidates).map_err(std::io::Error::other)?;
        fs::write(&elements, json)?;

        Ok(DiagnosticArtifacts {
            screenshot: screenshot_path,
            elements,
        })
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_screenshot_and_element_dump() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DiagnosticsSink::new(dir.path());
        let candidates = vec![CandidateElement {
            tag: "BUTTON".into(),
            text: "登入".into(),
            class: "por-button".into(),
            id: String::new(),
            has_click_handler: true,
        }];

        let artifacts = sink
            .capture_failure("password field", Some(b"\x89PNG"), &candidates)
            .unwrap();

        let screenshot = artifacts.screenshot.unwrap();
        assert!(screenshot.exists());
        assert!(screenshot.to_string_lossy().contains("password-field"));
        let dump = fs::read_to_string(&artifacts.elements).unwrap();
        assert!(dump.contains("登入"));
    }

    #[test]
    fn screenshot_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DiagnosticsSink::new(dir.path());
        let artifacts = sink.capture_failure("home punch", None, &[]).unwrap();
        assert!(artifacts.screenshot.is_none());
        assert!(artifacts.elements.exists());
    }
}
