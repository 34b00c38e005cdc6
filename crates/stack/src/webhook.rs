//! Webhook filter groups and their evaluation.
//!
//! A webhook holds an ordered list of [`FilterGroup`]s. Filters inside a group
//! are ANDed; groups are ORed. The hosting provider evaluates them against
//! every repository event; [`CompiledFilterGroups`] reproduces that evaluation
//! so trigger rules can be checked locally (by the `listener` crate and in
//! tests) before a webhook is ever created.
//!
//! `EVENT` patterns are comma-separated event names. Every other filter type
//! is a regular expression searched (not implicitly anchored) in the
//! corresponding event field; patterns anchor themselves with `^...$`. A field
//! the event does not carry never matches, so `BASE_REF` filters can only pass
//! for pull-request events.

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Declared form
// ---------------------------------------------------------------------------

/// The event field a filter inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterType {
    Event,
    HeadRef,
    BaseRef,
    FilePath,
    ActorAccountId,
    CommitMessage,
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Event => "EVENT",
            Self::HeadRef => "HEAD_REF",
            Self::BaseRef => "BASE_REF",
            Self::FilePath => "FILE_PATH",
            Self::ActorAccountId => "ACTOR_ACCOUNT_ID",
            Self::CommitMessage => "COMMIT_MESSAGE",
        };
        f.write_str(s)
    }
}

/// One `{type, pattern}` condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookFilter {
    #[serde(rename = "type")]
    pub kind: FilterType,
    pub pattern: String,
    /// Inverts the filter: it passes when the pattern does *not* match.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclude_matched_pattern: bool,
}

impl WebhookFilter {
    pub fn new(kind: FilterType, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            exclude_matched_pattern: false,
        }
    }

    /// `EVENT` filter accepting any of `events`.
    pub fn events(events: &[EventType]) -> Self {
        let pattern = events
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(FilterType::Event, pattern)
    }

    /// `HEAD_REF` filter matching exactly `refs/heads/<branch>`.
    pub fn head_branch(branch: &str) -> Self {
        Self::new(FilterType::HeadRef, exact_branch_pattern(branch))
    }

    /// `BASE_REF` filter matching exactly `refs/heads/<branch>`.
    pub fn base_branch(branch: &str) -> Self {
        Self::new(FilterType::BaseRef, exact_branch_pattern(branch))
    }

    /// Marks the filter as excluding.
    pub fn excluding(mut self) -> Self {
        self.exclude_matched_pattern = true;
        self
    }
}

/// Filters combined with AND semantics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterGroup {
    pub filters: Vec<WebhookFilter>,
}

impl FilterGroup {
    pub fn new(filters: Vec<WebhookFilter>) -> Self {
        Self { filters }
    }
}

fn exact_branch_pattern(branch: &str) -> String {
    format!("^refs/heads/{}$", regex::escape(branch))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Repository event types understood by `EVENT` filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Push,
    PullRequestCreated,
    PullRequestUpdated,
    PullRequestReopened,
    PullRequestMerged,
    PullRequestClosed,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        Self::Push,
        Self::PullRequestCreated,
        Self::PullRequestUpdated,
        Self::PullRequestReopened,
        Self::PullRequestMerged,
        Self::PullRequestClosed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::PullRequestCreated => "PULL_REQUEST_CREATED",
            Self::PullRequestUpdated => "PULL_REQUEST_UPDATED",
            Self::PullRequestReopened => "PULL_REQUEST_REOPENED",
            Self::PullRequestMerged => "PULL_REQUEST_MERGED",
            Self::PullRequestClosed => "PULL_REQUEST_CLOSED",
        }
    }

    /// Parses an event name, ignoring surrounding whitespace.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }

    pub fn is_pull_request(self) -> bool {
        !matches!(self, Self::Push)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields of a repository event that filters can inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEvent {
    pub event: EventType,
    /// Fully qualified source ref, e.g. `refs/heads/myBranch`.
    pub head_ref: Option<String>,
    /// Fully qualified target ref; only pull-request events carry one.
    pub base_ref: Option<String>,
    pub actor_account_id: Option<String>,
    pub commit_message: Option<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl RepositoryEvent {
    /// A pull-request event between two branches.
    pub fn pull_request(event: EventType, head_branch: &str, base_branch: &str) -> Self {
        Self {
            event,
            head_ref: Some(qualify_branch(head_branch)),
            base_ref: Some(qualify_branch(base_branch)),
            actor_account_id: None,
            commit_message: None,
            changed_files: Vec::new(),
        }
    }

    /// A push to `branch`.
    pub fn push(branch: &str) -> Self {
        Self {
            event: EventType::Push,
            head_ref: Some(qualify_branch(branch)),
            base_ref: None,
            actor_account_id: None,
            commit_message: None,
            changed_files: Vec::new(),
        }
    }
}

/// `main` → `refs/heads/main`; already qualified refs pass through.
pub fn qualify_branch(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

enum Matcher {
    Events(Vec<EventType>),
    Pattern(FilterType, Regex),
}

struct CompiledFilter {
    matcher: Matcher,
    exclude: bool,
}

impl CompiledFilter {
    fn matches(&self, event: &RepositoryEvent) -> bool {
        let hit = match &self.matcher {
            Matcher::Events(events) => events.contains(&event.event),
            Matcher::Pattern(kind, regex) => match kind {
                FilterType::HeadRef => field_matches(regex, event.head_ref.as_deref()),
                FilterType::BaseRef => field_matches(regex, event.base_ref.as_deref()),
                FilterType::ActorAccountId => field_matches(regex, event.actor_account_id.as_deref()),
                FilterType::CommitMessage => field_matches(regex, event.commit_message.as_deref()),
                FilterType::FilePath => event.changed_files.iter().any(|f| regex.is_match(f)),
                FilterType::Event => false,
            },
        };
        hit != self.exclude
    }
}

fn field_matches(regex: &Regex, value: Option<&str>) -> bool {
    value.is_some_and(|v| regex.is_match(v))
}

/// Filter groups validated and compiled for evaluation.
pub struct CompiledFilterGroups {
    groups: Vec<Vec<CompiledFilter>>,
}

impl CompiledFilterGroups {
    /// Validates and compiles `groups`.
    ///
    /// Rejects an empty group list, empty groups, groups without exactly one
    /// `EVENT` filter, unknown event names, and patterns that do not compile.
    pub fn compile(groups: &[FilterGroup]) -> Result<Self, String> {
        if groups.is_empty() {
            return Err("webhook has no filter groups".into());
        }

        let mut compiled = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            if group.filters.is_empty() {
                return Err(format!("filter group {index} is empty"));
            }
            let event_filters = group
                .filters
                .iter()
                .filter(|f| f.kind == FilterType::Event)
                .count();
            if event_filters != 1 {
                return Err(format!(
                    "filter group {index} must contain exactly one EVENT filter (found {event_filters})"
                ));
            }

            let mut filters = Vec::with_capacity(group.filters.len());
            for filter in &group.filters {
                filters.push(compile_filter(index, filter)?);
            }
            compiled.push(filters);
        }
        Ok(Self { groups: compiled })
    }

    /// Returns `true` if any group has every filter passing for `event`.
    pub fn triggers(&self, event: &RepositoryEvent) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().all(|filter| filter.matches(event)))
    }
}

fn compile_filter(group: usize, filter: &WebhookFilter) -> Result<CompiledFilter, String> {
    let matcher = match filter.kind {
        FilterType::Event => {
            let mut events = Vec::new();
            for name in filter.pattern.split(',') {
                let event = EventType::parse(name).ok_or_else(|| {
                    format!("filter group {group}: unknown event type '{}'", name.trim())
                })?;
                events.push(event);
            }
            Matcher::Events(events)
        }
        kind => {
            if filter.pattern.is_empty() {
                return Err(format!("filter group {group}: {kind} pattern is empty"));
            }
            let regex = Regex::new(&filter.pattern)
                .map_err(|e| format!("filter group {group}: invalid {kind} pattern: {e}"))?;
            Matcher::Pattern(kind, regex)
        }
    };
    Ok(CompiledFilter {
        matcher,
        exclude: filter.exclude_matched_pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pull_request_group() -> Vec<FilterGroup> {
        vec![FilterGroup::new(vec![
            WebhookFilter::new(
                FilterType::Event,
                "PULL_REQUEST_CREATED, PULL_REQUEST_UPDATED, PULL_REQUEST_REOPENED",
            ),
            WebhookFilter::new(FilterType::HeadRef, "^refs/heads/myBranch$"),
            WebhookFilter::new(FilterType::BaseRef, "^refs/heads/master$"),
        ])]
    }

    #[rstest]
    #[case(EventType::PullRequestCreated, "myBranch", "master", true)]
    #[case(EventType::PullRequestUpdated, "myBranch", "master", true)]
    #[case(EventType::PullRequestReopened, "myBranch", "master", true)]
    #[case(EventType::PullRequestCreated, "other-branch", "master", false)]
    #[case(EventType::PullRequestCreated, "myBranch", "develop", false)]
    #[case(EventType::PullRequestCreated, "myBranch2", "master", false)]
    #[case(EventType::PullRequestMerged, "myBranch", "master", false)]
    fn pull_request_filters(
        #[case] event: EventType,
        #[case] head: &str,
        #[case] base: &str,
        #[case] expected: bool,
    ) {
        let groups = CompiledFilterGroups::compile(&pull_request_group()).unwrap();
        assert_eq!(
            groups.triggers(&RepositoryEvent::pull_request(event, head, base)),
            expected
        );
    }

    #[test]
    fn push_never_triggers_pull_request_group() {
        let groups = CompiledFilterGroups::compile(&pull_request_group()).unwrap();
        assert!(!groups.triggers(&RepositoryEvent::push("myBranch")));

        let mut push_with_refs = RepositoryEvent::pull_request(EventType::PullRequestCreated, "myBranch", "master");
        push_with_refs.event = EventType::Push;
        assert!(!groups.triggers(&push_with_refs));
    }

    #[test]
    fn groups_are_ored() {
        let mut groups = pull_request_group();
        groups.push(FilterGroup::new(vec![
            WebhookFilter::events(&[EventType::Push]),
            WebhookFilter::head_branch("release"),
        ]));
        let compiled = CompiledFilterGroups::compile(&groups).unwrap();
        assert!(compiled.triggers(&RepositoryEvent::push("release")));
        assert!(!compiled.triggers(&RepositoryEvent::push("main")));
        assert!(compiled.triggers(&RepositoryEvent::pull_request(
            EventType::PullRequestCreated,
            "myBranch",
            "master"
        )));
    }

    #[test]
    fn exclude_inverts_a_filter() {
        let groups = vec![FilterGroup::new(vec![
            WebhookFilter::events(&[EventType::Push]),
            WebhookFilter::head_branch("main").excluding(),
        ])];
        let compiled = CompiledFilterGroups::compile(&groups).unwrap();
        assert!(!compiled.triggers(&RepositoryEvent::push("main")));
        assert!(compiled.triggers(&RepositoryEvent::push("feature")));
    }

    #[test]
    fn file_path_matches_any_changed_file() {
        let groups = vec![FilterGroup::new(vec![
            WebhookFilter::events(&[EventType::Push]),
            WebhookFilter::new(FilterType::FilePath, r"^src/.*\.rs$"),
        ])];
        let compiled = CompiledFilterGroups::compile(&groups).unwrap();
        let mut event = RepositoryEvent::push("main");
        event.changed_files = vec!["README.md".into(), "src/lib.rs".into()];
        assert!(compiled.triggers(&event));
        event.changed_files = vec!["README.md".into()];
        assert!(!compiled.triggers(&event));
    }

    #[test]
    fn branch_helpers_escape_and_anchor() {
        assert_eq!(WebhookFilter::head_branch("myBranch").pattern, "^refs/heads/myBranch$");
        assert_eq!(WebhookFilter::base_branch("release.1").pattern, r"^refs/heads/release\.1$");
    }

    #[rstest]
    #[case(Vec::new(), "no filter groups")]
    #[case(vec![FilterGroup::default()], "is empty")]
    #[case(vec![FilterGroup::new(vec![WebhookFilter::head_branch("main")])], "exactly one EVENT")]
    #[case(vec![FilterGroup::new(vec![WebhookFilter::new(FilterType::Event, "PULL_REQUEST_OPENED")])], "unknown event type")]
    #[case(vec![FilterGroup::new(vec![
        WebhookFilter::events(&[EventType::Push]),
        WebhookFilter::new(FilterType::HeadRef, "^refs/heads/(unclosed$"),
    ])], "invalid HEAD_REF pattern")]
    fn invalid_groups_are_rejected(#[case] groups: Vec<FilterGroup>, #[case] expected: &str) {
        let err = CompiledFilterGroups::compile(&groups).err().expect("should be rejected");
        assert!(err.contains(expected), "unexpected error: {err}");
    }

    #[test]
    fn filter_serializes_with_provider_field_names() {
        let json = serde_json::to_value(WebhookFilter::head_branch("main")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "HEAD_REF", "pattern": "^refs/heads/main$" }));
    }
}
