//! Completion check over the durable result artifact.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, instrument, warn};

use crate::core::text::decode_text;
use crate::core::types::NextPhase;

pub const REASON_ABSENT: &str = "file absent";
pub const REASON_UNDECODABLE: &str = "file content could not be decoded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneVerdict {
    Done {
        reason: String,
        next_phase: NextPhase,
    },
    NotDone {
        reason: String,
        /// Required markers absent from the artifact (empty when the artifact
        /// itself is absent or unreadable).
        missing: Vec<String>,
    },
}

impl DoneVerdict {
    pub fn is_done(&self) -> bool {
        matches!(self, DoneVerdict::Done { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            DoneVerdict::Done { reason, .. } | DoneVerdict::NotDone { reason, .. } => reason,
        }
    }
}

/// Decides whether the current phase goal is met: `target` exists and
/// contains every required marker.
#[derive(Debug, Clone)]
pub struct DoneEvaluator {
    pub target: PathBuf,
    pub required_markers: Vec<String>,
    pub next_phase: NextPhase,
}

impl DoneEvaluator {
    #[instrument(skip_all, fields(target = %self.target.display()))]
    pub fn evaluate(&self) -> DoneVerdict {
        let bytes = match fs::read(&self.target) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("done target absent");
                return not_done(REASON_ABSENT, Vec::new());
            }
            Err(err) => {
                warn!(err = %err, "done target unreadable");
                return not_done(format!("file unreadable: {err}"), Vec::new());
            }
        };

        let Some(content) = decode_text(&bytes) else {
            warn!(len = bytes.len(), "done target undecodable");
            return not_done(REASON_UNDECODABLE, Vec::new());
        };

        let missing: Vec<String> = self
            .required_markers
            .iter()
            .filter(|marker| !content.contains(marker.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!("all required markers present");
            DoneVerdict::Done {
                reason: format!(
                    "{} exists and contains all required markers",
                    self.target.display()
                ),
                next_phase: self.next_phase.clone(),
            }
        } else {
            debug!(?missing, "required markers missing");
            not_done(format!("missing markers: {}", missing.join(", ")), missing)
        }
    }
}

fn not_done(reason: impl Into<String>, missing: Vec<String>) -> DoneVerdict {
    DoneVerdict::NotDone {
        reason: reason.into(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NextInstruction;

    fn evaluator(dir: &std::path::Path) -> DoneEvaluator {
        DoneEvaluator {
            target: dir.join("results").join("result_v2.txt"),
            required_markers: vec!["合計:".into(), "平均:".into(), "件数:".into()],
            next_phase: NextPhase {
                name: "report".into(),
                done_condition: "TBD".into(),
                instruction: NextInstruction {
                    id: "report-001".into(),
                    ..NextInstruction::default()
                },
            },
        }
    }

    fn write_target(eval: &DoneEvaluator, bytes: &[u8]) {
        let parent = eval.target.parent().expect("parent");
        fs::create_dir_all(parent).expect("mkdir");
        fs::write(&eval.target, bytes).expect("write");
    }

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut out = if bom { vec![0xFF, 0xFE] } else { Vec::new() };
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn absent_target_is_not_done() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verdict = evaluator(temp.path()).evaluate();
        assert_eq!(
            verdict,
            DoneVerdict::NotDone {
                reason: REASON_ABSENT.to_string(),
                missing: Vec::new()
            }
        );
    }

    #[test]
    fn lists_exactly_the_missing_markers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let eval = evaluator(temp.path());
        write_target(&eval, "合計: 10\n".as_bytes());
        match eval.evaluate() {
            DoneVerdict::NotDone { missing, .. } => {
                assert_eq!(missing, vec!["平均:".to_string(), "件数:".to_string()]);
            }
            other => panic!("expected not done, got {other:?}"),
        }
    }

    #[test]
    fn all_markers_done_regardless_of_extra_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let eval = evaluator(temp.path());
        write_target(&eval, "header\n合計: 10\n平均: 2.5\n件数: 4\nfooter".as_bytes());
        match eval.evaluate() {
            DoneVerdict::Done { next_phase, .. } => {
                assert_eq!(next_phase.instruction.id, "report-001");
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn reads_utf16_with_bom() {
        let temp = tempfile::tempdir().expect("tempdir");
        let eval = evaluator(temp.path());
        write_target(&eval, &utf16le("合計: 1\r\n平均: 1\r\n件数: 1\r\n", true));
        assert!(eval.evaluate().is_done());
    }

    #[test]
    fn reads_bomless_utf16le() {
        let temp = tempfile::tempdir().expect("tempdir");
        let eval = evaluator(temp.path());
        write_target(&eval, &utf16le("合計: 1 平均: 1 件数: 1", false));
        assert!(eval.evaluate().is_done());
    }

    #[test]
    fn reads_cp932() {
        let temp = tempfile::tempdir().expect("tempdir");
        let eval = evaluator(temp.path());
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("合計: 1\r\n平均: 1\r\n件数: 1\r\n");
        write_target(&eval, &bytes);
        assert!(eval.evaluate().is_done());
    }

    #[test]
    fn undecodable_bytes_are_not_done() {
        let temp = tempfile::tempdir().expect("tempdir");
        let eval = evaluator(temp.path());
        write_target(&eval, &[0xC3, 0x28, 0xFF]);
        assert_eq!(eval.evaluate().reason(), REASON_UNDECODABLE);
    }
}
