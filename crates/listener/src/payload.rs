use std::collections::BTreeSet;

use serde::Deserialize;

use stack::{EventType, RepositoryEvent};

use crate::ListenerError;

pub const PULL_REQUEST_EVENT: &str = "pull_request";
pub const PUSH_EVENT: &str = "push";
pub const PING_EVENT: &str = "ping";

#[derive(Debug, Deserialize)]
struct Account {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    head: GitRef,
    base: GitRef,
    #[serde(default)]
    merged: bool,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequest,
    sender: Option<Account>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Commit {
    message: String,
    added: Vec<String>,
    modified: Vec<String>,
    removed: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    name: String,
    #[serde(default)]
    deleted: bool,
    head_commit: Option<Commit>,
    #[serde(default)]
    commits: Vec<Commit>,
    sender: Option<Account>,
}

/// Decodes one webhook delivery.
///
/// Returns `Ok(None)` for deliveries the build service ignores: pings, branch
/// deletions, and pull-request actions other than opened, synchronized,
/// edited, reopened and closed.
pub fn decode(event: &str, body: &[u8]) -> Result<Option<RepositoryEvent>, ListenerError> {
    match event {
        PING_EVENT => Ok(None),
        PULL_REQUEST_EVENT => decode_pull_request(serde_json::from_slice(body)?),
        PUSH_EVENT => Ok(decode_push(serde_json::from_slice(body)?)),
        other => Err(ListenerError::UnsupportedEvent(other.to_string())),
    }
}

fn decode_pull_request(payload: PullRequestPayload) -> Result<Option<RepositoryEvent>, ListenerError> {
    let event = match payload.action.as_str() {
        "opened" => EventType::PullRequestCreated,
        "synchronize" | "edited" => EventType::PullRequestUpdated,
        "reopened" => EventType::PullRequestReopened,
        "closed" if payload.pull_request.merged => EventType::PullRequestMerged,
        "closed" => EventType::PullRequestClosed,
        action => {
            tracing::debug!(action, "ignoring pull request action");
            return Ok(None);
        }
    };

    let mut decoded = RepositoryEvent::pull_request(
        event,
        &payload.pull_request.head.name,
        &payload.pull_request.base.name,
    );
    decoded.actor_account_id = payload.sender.map(|s| s.id.to_string());
    Ok(Some(decoded))
}

fn decode_push(payload: PushPayload) -> Option<RepositoryEvent> {
    if payload.deleted {
        tracing::debug!(reference = %payload.name, "ignoring ref deletion");
        return None;
    }

    let changed_files: BTreeSet<String> = payload
        .commits
        .iter()
        .flat_map(|c| c.added.iter().chain(&c.modified).chain(&c.removed))
        .cloned()
        .collect();

    let mut decoded = RepositoryEvent::push(&payload.name);
    decoded.actor_account_id = payload.sender.map(|s| s.id.to_string());
    decoded.commit_message = payload.head_commit.map(|c| c.message);
    decoded.changed_files = changed_files.into_iter().collect();
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn pull_request(action: &str, merged: bool) -> Vec<u8> {
        json!({
            "action": action,
            "number": 7,
            "pull_request": {
                "head": { "ref": "myBranch", "sha": "0a1b2c" },
                "base": { "ref": "master", "sha": "3d4e5f" },
                "merged": merged
            },
            "sender": { "id": 4242, "login": "octocat" }
        })
        .to_string()
        .into_bytes()
    }

    #[rstest]
    #[case("opened", false, EventType::PullRequestCreated)]
    #[case("synchronize", false, EventType::PullRequestUpdated)]
    #[case("edited", false, EventType::PullRequestUpdated)]
    #[case("reopened", false, EventType::PullRequestReopened)]
    #[case("closed", true, EventType::PullRequestMerged)]
    #[case("closed", false, EventType::PullRequestClosed)]
    fn pull_request_actions_map_to_event_types(
        #[case] action: &str,
        #[case] merged: bool,
        #[case] expected: EventType,
    ) {
        let event = decode(PULL_REQUEST_EVENT, &pull_request(action, merged))
            .unwrap()
            .unwrap();
        assert_eq!(event.event, expected);
        assert_eq!(event.head_ref.as_deref(), Some("refs/heads/myBranch"));
        assert_eq!(event.base_ref.as_deref(), Some("refs/heads/master"));
        assert_eq!(event.actor_account_id.as_deref(), Some("4242"));
    }

    #[test]
    fn labeled_pull_request_is_ignored() {
        assert!(decode(PULL_REQUEST_EVENT, &pull_request("labeled", false)).unwrap().is_none());
    }

    #[test]
    fn push_collects_message_and_changed_files() {
        let body = json!({
            "ref": "refs/heads/myBranch",
            "deleted": false,
            "head_commit": { "message": "fix build", "added": [], "modified": ["index.ts"], "removed": [] },
            "commits": [
                { "message": "add docs", "added": ["README.md"], "modified": [], "removed": [] },
                { "message": "fix build", "added": [], "modified": ["index.ts"], "removed": [] }
            ],
            "sender": { "id": 1 }
        });
        let event = decode(PUSH_EVENT, body.to_string().as_bytes()).unwrap().unwrap();

        assert_eq!(event.event, EventType::Push);
        assert_eq!(event.head_ref.as_deref(), Some("refs/heads/myBranch"));
        assert_eq!(event.base_ref, None);
        assert_eq!(event.commit_message.as_deref(), Some("fix build"));
        assert_eq!(event.changed_files, vec!["README.md", "index.ts"]);
    }

    #[test]
    fn branch_deletion_is_ignored() {
        let body = json!({ "ref": "refs/heads/old", "deleted": true, "commits": [] });
        assert!(decode(PUSH_EVENT, body.to_string().as_bytes()).unwrap().is_none());
    }

    #[test]
    fn ping_is_ignored() {
        assert!(decode(PING_EVENT, b"{\"zen\":\"Keep it logically awesome.\"}").unwrap().is_none());
    }

    #[test]
    fn unknown_event_is_unsupported() {
        let err = decode("issues", b"{}").unwrap_err();
        assert!(matches!(err, ListenerError::UnsupportedEvent(ref e) if e == "issues"), "got: {err:?}");
    }

    #[test]
    fn malformed_body_is_a_payload_error() {
        let err = decode(PULL_REQUEST_EVENT, b"{\"action\":").unwrap_err();
        assert!(matches!(err, ListenerError::Payload(_)), "got: {err:?}");
    }
}
