//! Related-item reference extraction.
//!
//! Scans an issue or pull request body for three forms of reference:
//!
//! 1. GitHub URLs: `https://github.com/<owner>/<repo>/(pull|issues)/<n>`
//! 2. Shorthand: `#<n>`, always resolved to the body's own repository
//! 3. Keyword phrases: `PR <n>`, `pull request #<n>`, `issue <n>`
//!
//! Matches are taken left to right. When two candidates overlap, the one that
//! starts first wins; on an equal start the lower-numbered form above wins.
//! A bare integer is never a reference, and numbers that continue into a
//! version or date (`1.2.3`, `2024-01-01`) are rejected.

use crate::models::reference::{ReferenceForm, ReferenceTarget, RelatedReference};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)https?://(?:www\.)?github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/(pull|pulls|issues)/(\d+)",
    )
    .expect("URL reference pattern is valid")
});

static SHORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d+)").expect("short reference pattern is valid"));

static TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(pull\s+request|PR|issue)\s*#?(\d+)")
        .expect("text reference pattern is valid")
});

/// A match before overlap resolution.
struct Candidate {
    start: usize,
    end: usize,
    reference: RelatedReference,
}

/// Extract references from `body`, whose item lives in `repository` (`owner/name`).
///
/// The result is in first-occurrence order with one entry per
/// (repository, number).
pub fn extract_references(body: &str, repository: &str) -> Vec<RelatedReference> {
    if body.is_empty() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    collect_urls(body, repository, &mut candidates);
    collect_short(body, repository, &mut candidates);
    collect_text(body, repository, &mut candidates);

    // Forms were pushed in precedence order, so a stable sort keeps it on ties
    candidates.sort_by_key(|c| c.start);

    let mut seen = HashSet::new();
    let mut references = Vec::new();
    let mut consumed_to = 0;

    for candidate in candidates {
        if candidate.start < consumed_to {
            continue;
        }
        consumed_to = candidate.end;

        let key = (
            candidate.reference.repository.to_lowercase(),
            candidate.reference.number,
        );
        if seen.insert(key) {
            references.push(candidate.reference);
        }
    }

    references
}

fn collect_urls(body: &str, repository: &str, out: &mut Vec<Candidate>) {
    for caps in URL_RE.captures_iter(body) {
        let (Some(whole), Some(owner), Some(name), Some(kind), Some(number)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3), caps.get(4))
        else {
            continue;
        };
        let Some(number) = parse_number(number.as_str()) else {
            continue;
        };

        let target_repo = format!("{}/{}", owner.as_str(), name.as_str());
        let external = !target_repo.eq_ignore_ascii_case(repository);
        let target = if kind.as_str().eq_ignore_ascii_case("issues") {
            ReferenceTarget::Issue
        } else {
            ReferenceTarget::PullRequest
        };

        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            reference: RelatedReference {
                repository: if external {
                    target_repo
                } else {
                    repository.to_string()
                },
                number,
                target,
                form: ReferenceForm::Url,
                external,
            },
        });
    }
}

fn collect_short(body: &str, repository: &str, out: &mut Vec<Candidate>) {
    for caps in SHORT_RE.captures_iter(body) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // `a#1`, `&#123;`
        if body[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '&')
        {
            continue;
        }
        if continues_number(&body[whole.end()..]) {
            continue;
        }
        let Some(number) = parse_number(number.as_str()) else {
            continue;
        };

        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            reference: RelatedReference {
                repository: repository.to_string(),
                number,
                target: ReferenceTarget::Unknown,
                form: ReferenceForm::Short,
                external: false,
            },
        });
    }
}

fn collect_text(body: &str, repository: &str, out: &mut Vec<Candidate>) {
    for caps in TEXT_RE.captures_iter(body) {
        let (Some(whole), Some(keyword), Some(number)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        if continues_number(&body[whole.end()..]) {
            continue;
        }
        let Some(number) = parse_number(number.as_str()) else {
            continue;
        };

        let target = if keyword.as_str().eq_ignore_ascii_case("issue") {
            ReferenceTarget::Issue
        } else {
            ReferenceTarget::PullRequest
        };

        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            reference: RelatedReference {
                repository: repository.to_string(),
                number,
                target,
                form: ReferenceForm::Text,
                external: false,
            },
        });
    }
}

/// True when the text after a number shows it is part of a larger token,
/// e.g. `12abc`, `1.2`, `2024-01`, `3/4`.
fn continues_number(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_alphanumeric() || c == '_' => true,
        Some('.' | '-' | '/') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn parse_number(digits: &str) -> Option<i64> {
    digits.parse::<i64>().ok().filter(|n| *n > 0)
}
