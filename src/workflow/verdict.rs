//! Turns a raw comparison response into exactly one way of reaching a verdict.

use thiserror::Error;

use crate::{db::Verdict, images::ImageRef, vision::CompareResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The comparison settled the verdict; it is recorded as-is.
    Automatic(Verdict),
    /// A human has to decide. `suggested` is whatever the service guessed
    /// and is only ever shown, never recorded.
    Operator { suggested: Option<Verdict> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutcome {
    pub captured_image: ImageRef,
    pub diff_image: Option<ImageRef>,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("vision service returned neither a verdict nor an operator-decision request")]
pub struct MissingVerdict;

/// The operator flag always wins: when it is set, a verdict in the same
/// response is demoted to a suggestion.
pub fn resolve(response: CompareResponse) -> Result<ComparisonOutcome, MissingVerdict> {
    let resolution = match (response.operator_decision_required, response.verdict) {
        (true, suggested) => Resolution::Operator { suggested },
        (false, Some(verdict)) => Resolution::Automatic(verdict),
        (false, None) => return Err(MissingVerdict),
    };

    Ok(ComparisonOutcome {
        captured_image: response.captured_image,
        diff_image: response.diff_image,
        resolution,
    })
}

/// True when the operator picked the opposite of the service's suggestion.
pub fn overrides_suggestion(suggested: Option<Verdict>, decision: Verdict) -> bool {
    matches!(suggested, Some(suggestion) if suggestion != decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(verdict: Option<Verdict>, od: bool) -> CompareResponse {
        CompareResponse {
            captured_image: ImageRef::Remote("http://vision.local/captured.png".into()),
            diff_image: Some(ImageRef::Remote("http://vision.local/diff.png".into())),
            verdict,
            operator_decision_required: od,
        }
    }

    #[test]
    fn verdict_without_flag_is_automatic() {
        let outcome = resolve(response(Some(Verdict::Pass), false)).unwrap();
        assert_eq!(outcome.resolution, Resolution::Automatic(Verdict::Pass));
        assert!(outcome.diff_image.is_some());
    }

    #[test]
    fn flag_alone_needs_an_operator() {
        let outcome = resolve(response(None, true)).unwrap();
        assert_eq!(outcome.resolution, Resolution::Operator { suggested: None });
    }

    #[test]
    fn flag_demotes_a_verdict_to_a_suggestion() {
        let outcome = resolve(response(Some(Verdict::Fail), true)).unwrap();
        assert_eq!(
            outcome.resolution,
            Resolution::Operator {
                suggested: Some(Verdict::Fail)
            }
        );
    }

    #[test]
    fn neither_verdict_nor_flag_is_rejected() {
        assert_eq!(resolve(response(None, false)), Err(MissingVerdict));
    }

    #[test]
    fn override_detection() {
        assert!(overrides_suggestion(Some(Verdict::Fail), Verdict::Pass));
        assert!(!overrides_suggestion(Some(Verdict::Pass), Verdict::Pass));
        assert!(!overrides_suggestion(None, Verdict::Fail));
    }
}
