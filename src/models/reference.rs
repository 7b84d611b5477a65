//! Related-item references found in issue and PR bodies.

use serde::{Deserialize, Serialize};

/// How a reference was written in the body text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceForm {
    /// `https://github.com/<owner>/<repo>/(pull|issues)/<n>`
    Url,
    /// `#<n>`
    Short,
    /// Keyword phrase such as `PR 12` or `issue 7`.
    Text,
}

/// What kind of item the reference points at, when it can be told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTarget {
    Issue,
    PullRequest,
    Unknown,
}

/// One reference extracted from a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedReference {
    /// Target repository as `owner/name`.
    pub repository: String,

    pub number: i64,

    pub target: ReferenceTarget,

    pub form: ReferenceForm,

    /// Whether `repository` differs from the body's own repository.
    pub external: bool,
}

impl RelatedReference {
    /// Indicator code shown next to the reference in the UI.
    ///
    /// `E` marks a cross-repository reference and takes precedence over `T`,
    /// which marks a text-derived one. Same-repo structural matches have none.
    pub fn indicator(&self) -> Option<&'static str> {
        if self.external {
            Some("E")
        } else if self.form == ReferenceForm::Text {
            Some("T")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(form: ReferenceForm, external: bool) -> RelatedReference {
        RelatedReference {
            repository: "o/r".to_string(),
            number: 1,
            target: ReferenceTarget::Unknown,
            form,
            external,
        }
    }

    #[test]
    fn test_indicator_codes() {
        assert_eq!(reference(ReferenceForm::Url, false).indicator(), None);
        assert_eq!(reference(ReferenceForm::Short, false).indicator(), None);
        assert_eq!(reference(ReferenceForm::Text, false).indicator(), Some("T"));
        assert_eq!(reference(ReferenceForm::Url, true).indicator(), Some("E"));
        assert_eq!(reference(ReferenceForm::Text, true).indicator(), Some("E"));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_string(&reference(ReferenceForm::Short, false)).unwrap();
        assert_eq!(
            json,
            r#"{"repository":"o/r","number":1,"target":"unknown","form":"short","external":false}"#
        );
    }
}
