//! Prompt text sent to the executor
//!
//! Follow-up dispatches get a deliberately lighter prompt so an agent does
//! not rescan the whole directory on every settle cycle.

use super::{DispatchKind, DispatchRequest};
use std::fmt::Write as _;

pub fn render_prompt(request: &DispatchRequest) -> String {
    let mut prompt = String::new();

    match request.kind {
        DispatchKind::Initial => {
            let _ = writeln!(
                prompt,
                "Changes were detected in the watched folder {} ({}).",
                request.watch_path.display(),
                request.diff
            );
            let _ = writeln!(
                prompt,
                "Inspect what changed and act on it according to the instructions below."
            );
        }
        DispatchKind::FollowUp => {
            let _ = writeln!(
                prompt,
                "Follow-up check #{} for {} ({} since your last pass).",
                request.iteration,
                request.watch_path.display(),
                request.diff
            );
            let _ = writeln!(
                prompt,
                "Verify quickly. Only act if the folder is still not organized according to the instructions below; otherwise stop without making changes."
            );
        }
    }

    if request.working_folder != request.watch_path {
        let _ = writeln!(prompt, "Work inside {}.", request.working_folder.display());
    }

    prompt.push('\n');
    prompt.push_str("Instructions:\n");
    prompt.push_str(request.instructions.trim());
    prompt.push('\n');

    if !request.parameters.is_empty() {
        prompt.push_str("\nParameters:\n");
        for (key, value) in &request.parameters {
            let _ = writeln!(prompt, "- {}: {}", key, value);
        }
    }

    prompt
}
