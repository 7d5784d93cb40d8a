//! Deployment troubleshooting
//!
//! Maps known error signatures in deployment output to remediation
//! suggestions. Queries accept either a stored deployment id or raw log
//! text. Suggestions are advisory only; nothing is ever auto-applied.

use serde::Serialize;

use crate::error::CaravelResult;
use crate::orchestrate::RecordStore;

/// One identified problem with its suggested fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub problem: String,
    pub suggested_fix: String,
}

struct Signature {
    needle: &'static str,
    problem: &'static str,
    suggested_fix: &'static str,
}

const SIGNATURES: &[Signature] = &[
    Signature {
        needle: "530 login incorrect",
        problem: "FTP login failed",
        suggested_fix: "Check the stored username and password, then re-run authenticate.",
    },
    Signature {
        needle: "no credentials stored",
        problem: "No stored credentials for the provider",
        suggested_fix: "Run authenticate for this provider before deploying.",
    },
    Signature {
        needle: "authentication rejected",
        problem: "Provider rejected the stored credentials",
        suggested_fix: "Re-run authenticate with fresh credentials for this provider.",
    },
    Signature {
        needle: "connection refused",
        problem: "Connection refused by the server",
        suggested_fix: "Verify the hostname and that the server accepts connections on the \
                        expected port.",
    },
    Signature {
        needle: "permission denied",
        problem: "The server denied a file operation",
        suggested_fix: "Check that the account has write access to the remote deployment \
                        directory.",
    },
    Signature {
        needle: "no such file",
        problem: "Remote directory does not exist",
        suggested_fix: "Verify the remote path; create the deployment directory on the server \
                        if needed.",
    },
    Signature {
        needle: "disk quota exceeded",
        problem: "Remote disk quota exceeded",
        suggested_fix: "Free up space on the hosting account or upgrade the plan.",
    },
    Signature {
        needle: "required environment variable",
        problem: "The build is missing required environment variables",
        suggested_fix: "Pass the listed variables via the deploy env options and retry.",
    },
    Signature {
        needle: "timed out",
        problem: "An operation exceeded its timeout",
        suggested_fix: "Retry; if it persists, raise the transfer or build timeout in the \
                        configuration.",
    },
    Signature {
        needle: "deployment aborted",
        problem: "The deployment was cancelled before completion",
        suggested_fix: "Re-run the deployment; smart mode will skip files that already landed.",
    },
];

/// Scan text for known failure signatures
pub fn analyze_text(text: &str) -> Vec<Diagnosis> {
    let lowered = text.to_lowercase();
    let mut diagnoses: Vec<Diagnosis> = SIGNATURES
        .iter()
        .filter(|sig| lowered.contains(sig.needle))
        .map(|sig| Diagnosis {
            problem: sig.problem.to_string(),
            suggested_fix: sig.suggested_fix.to_string(),
        })
        .collect();

    // Something clearly went wrong but nothing matched: say so rather
    // than returning silence.
    if diagnoses.is_empty() && (lowered.contains("error") || lowered.contains("failed")) {
        diagnoses.push(Diagnosis {
            problem: "Unknown deployment error".to_string(),
            suggested_fix: "Inspect the full deployment output; re-run with RUST_LOG=debug for \
                            more detail."
                .to_string(),
        });
    }

    diagnoses
}

/// Troubleshoot a stored deployment or a raw log snippet
///
/// When `query` matches a stored deployment id, its record (status,
/// counters, failure detail) is analyzed; otherwise the query itself is
/// treated as log text.
pub fn troubleshoot(records: &RecordStore, query: &str) -> CaravelResult<Vec<Diagnosis>> {
    if let Ok(record) = records.load(query.trim()) {
        let mut text = String::new();
        if let Some(detail) = &record.failure_detail {
            text.push_str(detail);
            text.push('\n');
        }
        if record.operations_failed > 0 {
            text.push_str(&format!("{} operations failed\n", record.operations_failed));
        }
        let mut diagnoses = analyze_text(&text);
        if diagnoses.is_empty() {
            match record.final_status {
                crate::orchestrate::DeployStatus::Succeeded => diagnoses.push(Diagnosis {
                    problem: "No failure recorded for this deployment".to_string(),
                    suggested_fix: "The deployment finished cleanly; nothing to fix.".to_string(),
                }),
                _ => diagnoses.push(Diagnosis {
                    problem: record
                        .failure_detail
                        .clone()
                        .unwrap_or_else(|| "Deployment did not complete".to_string()),
                    suggested_fix: "Inspect the recorded failure detail and re-run the \
                                    deployment once the cause is addressed."
                        .to_string(),
                }),
            }
        }
        return Ok(diagnoses);
    }
    Ok(analyze_text(query))
}
