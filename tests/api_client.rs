use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver};
use tiny_http::{Header, Response, Server};
use unsaid::api::{Client, ClientConfig};
use unsaid::auth::Flow;
use unsaid::error::ApiError;
use unsaid::notice::ChannelSink;
use unsaid::session::{Manager, SessionEvent, SessionPolicy};
use unsaid::storage::Store;

#[derive(Debug)]
struct Seen {
    method: String,
    url: String,
    authorization: Option<String>,
}

/// Answers each incoming request with the next canned response.
fn fake_backend(responses: Vec<(u16, &'static str)>) -> (String, Receiver<Seen>) {
    let server = Server::http("127.0.0.1:0").expect("bind fake backend");
    let port = server.server_addr().to_ip().expect("ip listener").port();
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok(request) = server.recv() else { return };
            let authorization = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            let _ = tx.send(Seen {
                method: request.method().to_string(),
                url: request.url().to_string(),
                authorization,
            });
            let json = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
            let _ = request.respond(
                Response::from_string(body)
                    .with_status_code(status)
                    .with_header(json),
            );
        }
    });
    (format!("http://127.0.0.1:{port}/api"), rx)
}

struct Harness {
    store: Arc<Store>,
    session: Arc<Manager>,
    client: Arc<Client>,
}

fn harness(base_url: String) -> Harness {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let session = Arc::new(Manager::new(store.clone()).unwrap());
    let client = Arc::new(
        Client::new(
            Arc::new(SessionPolicy::new(session.clone())),
            ClientConfig {
                base_url,
                user_agent: "unsaid-tests".into(),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    Harness {
        store,
        session,
        client,
    }
}

const USER: &str = r#"{"id":"u1","username":"quiet","displayName":"Quiet"}"#;
const AUTH: &str = r#"{"token":"tok-123","user":{"id":"u1","username":"quiet","displayName":"Quiet"}}"#;
const ONE_POST: &str = r#"[{"id":"p1","authorId":"u1","text":"hi","createdAt":"2024-05-01T12:00:00Z"}]"#;

#[test]
fn bearer_attached_only_after_login() {
    let (base, seen) = fake_backend(vec![(200, AUTH), (200, ONE_POST)]);
    let h = harness(base);
    let flow = Flow::new(h.client.clone(), h.session.clone(), Arc::new(ChannelSink::new()));

    let user = flow.login("quiet@example.com", "hunter22").unwrap();
    assert_eq!(user.username, "quiet");
    let login = seen.recv().unwrap();
    assert_eq!(login.method, "POST");
    assert_eq!(login.url, "/api/auth/login");
    assert!(login.authorization.is_none());

    let posts = h.client.feed(10, 10).unwrap();
    assert_eq!(posts.len(), 1);
    let feed = seen.recv().unwrap();
    assert_eq!(feed.url, "/api/feed?skip=10&limit=10");
    assert_eq!(feed.authorization.as_deref(), Some("Bearer tok-123"));

    let stored = h.store.load_session().unwrap().unwrap();
    assert_eq!(stored.token, "tok-123");
}

#[test]
fn unauthorized_response_clears_session() {
    let (base, _seen) = fake_backend(vec![(401, r#"{"detail":"Could not validate credentials"}"#)]);
    let h = harness(base);
    h.session
        .sign_in("stale".into(), serde_json::from_str(USER).unwrap())
        .unwrap();
    let events = h.session.events();
    let _ = events.try_recv();

    let err = h.client.feed(0, 10).unwrap_err();
    assert!(ApiError::is_unauthorized(&err));
    assert!(!h.session.is_signed_in());
    assert!(h.store.load_session().unwrap().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
}

#[test]
fn restore_with_rejected_token_signs_out() {
    let (base, _seen) = fake_backend(vec![(401, "{}")]);
    let h = harness(base);
    h.session
        .sign_in("stale".into(), serde_json::from_str(USER).unwrap())
        .unwrap();
    let flow = Flow::new(h.client.clone(), h.session.clone(), Arc::new(ChannelSink::new()));
    assert!(flow.restore().unwrap().is_none());
    assert!(!h.session.is_signed_in());
}

#[test]
fn server_error_carries_detail() {
    let (base, seen) = fake_backend(vec![(404, r#"{"detail":"Post not found"}"#)]);
    let h = harness(base);
    let err = h.client.post("missing one").unwrap_err();
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Status { status, detail }) => {
            assert_eq!(*status, 404);
            assert_eq!(detail, "Post not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(seen.recv().unwrap().url, "/api/posts/missing%20one");
}

#[test]
fn reaction_and_save_hit_post_routes() {
    let (base, seen) = fake_backend(vec![(200, "{}"), (200, r#"{"isSaved":true}"#)]);
    let h = harness(base);
    h.client
        .react("p1", unsaid::models::ReactionKind::Moon)
        .unwrap();
    assert_eq!(seen.recv().unwrap().url, "/api/posts/p1/react");
    assert!(h.client.toggle_save("p1").unwrap().is_saved);
    assert_eq!(seen.recv().unwrap().url, "/api/posts/p1/save");
}

#[test]
fn follow_reads_state_and_reports_bad_bodies() {
    let (base, seen) = fake_backend(vec![
        (200, r#"{"isFollowing":false,"status":"pending"}"#),
        (200, ""),
        (200, "<html>oops</html>"),
    ]);
    let h = harness(base);

    let state = h.client.follow("u2").unwrap();
    assert_eq!(state.is_following, Some(false));
    assert_eq!(state.status.as_deref(), Some("pending"));
    assert_eq!(seen.recv().unwrap().url, "/api/users/u2/follow");

    let state = h.client.unfollow("u2").unwrap();
    assert_eq!(state.is_following, None);
    assert_eq!(seen.recv().unwrap().url, "/api/users/u2/unfollow");

    assert!(h.client.follow("u2").is_err());
}
