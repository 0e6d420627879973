use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::credential::CredentialStore;
use crate::llm::{self, CompletionRequest, CompletionTransport};
use crate::models::{ChatTurn, Message};
use crate::selector::{Model, ModelSelector};
use crate::telemetry;

/** \brief Reason used when a failure carries no message of its own. */
pub const GENERIC_FAILURE_REASON: &str = "Failed to send message. Please check your auth token.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /** \brief Input was empty or whitespace only. */
    Empty,
    /** \brief Another request is still in flight. */
    Busy,
}

/**
 * \brief Result of one `send` call.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /** \brief Nothing happened: no message appended, no call made. */
    Ignored(IgnoreReason),
    /** \brief No credential set; the front end should prompt for one. */
    ConfigurationRequired,
    /** \brief The assistant reply that was appended. */
    Replied(Message),
    /** \brief The error message that was appended in place of a reply. */
    Failed(Message),
}

impl SendOutcome {
    /**
     * \brief The assistant message appended by this send, if any.
     */
    pub fn message(&self) -> Option<&Message> {
        match self {
            SendOutcome::Replied(m) | SendOutcome::Failed(m) => Some(m),
            _ => None,
        }
    }
}

struct Session {
    transcript: Vec<Message>,
    loading: bool,
    selector: ModelSelector,
    credential: CredentialStore,
}

/**
 * \brief Owns the transcript and the loading flag, and issues completion calls.
 * \details State sits behind a mutex that is never held across the network call,
 * so the controller can be shared (`Arc`) between front-end handlers. A send that
 * arrives while another is in flight is dropped, not queued.
 */
pub struct ChatController<T> {
    session: Arc<Mutex<Session>>,
    transport: T,
}

impl<T: CompletionTransport> ChatController<T> {
    pub fn new(credential: CredentialStore, transport: T) -> Self {
        Self::with_model(credential, transport, Model::default())
    }

    pub fn with_model(credential: CredentialStore, transport: T, model: Model) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                transcript: Vec::new(),
                loading: false,
                selector: ModelSelector::new(model),
                credential,
            })),
            transport,
        }
    }

    /**
     * \brief Send one user message and append the reply (or an error message).
     * \details The outbound messages are the transcript as it stood plus the new
     * user message. Transport and logical failures never surface as `Err`; they
     * become an assistant message. `Err` is reserved for a poisoned state lock.
     */
    pub async fn send(&self, text: &str) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored(IgnoreReason::Empty));
        }

        let (token, request) = {
            let mut session = self.lock()?;
            if session.loading {
                return Ok(SendOutcome::Ignored(IgnoreReason::Busy));
            }
            let token = match session.credential.token() {
                Some(t) => t.to_string(),
                None => return Ok(SendOutcome::ConfigurationRequired),
            };
            session.transcript.push(Message::user(text));
            session.loading = true;
            let turns = session.transcript.iter().map(ChatTurn::from).collect();
            (token, CompletionRequest::new(turns, session.selector.current()))
        };
        let _loading = LoadingGuard {
            session: Arc::clone(&self.session),
        };

        telemetry::log_event(
            "chat.send",
            &format!(
                "model={} turns={} prompt_len={}",
                request.args.model,
                request.args.messages.len(),
                text.len()
            ),
        );

        let result = match self.transport.complete(&token, &request).await {
            Ok(v) => llm::interpret_response(&v),
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(reply) => SendOutcome::Replied(Message::assistant(reply)),
            Err(e) => {
                // reqwest keeps the OS cause in `source()`; print the whole chain.
                let reason = format!("{:#}", e);
                let reason = if reason.trim().is_empty() {
                    GENERIC_FAILURE_REASON.to_string()
                } else {
                    reason
                };
                telemetry::log_error("chat.send", &reason);
                SendOutcome::Failed(Message::assistant(format!("Error: {}", reason)))
            }
        };

        if let Some(msg) = outcome.message() {
            self.lock()?.transcript.push(msg.clone());
        }
        Ok(outcome)
    }

    /**
     * \brief Snapshot of the transcript in temporal order.
     */
    pub fn messages(&self) -> Result<Vec<Message>> {
        Ok(self.lock()?.transcript.clone())
    }

    pub fn is_loading(&self) -> Result<bool> {
        Ok(self.lock()?.loading)
    }

    pub fn model(&self) -> Result<Model> {
        Ok(self.lock()?.selector.current())
    }

    pub fn set_model(&self, model: Model) -> Result<()> {
        self.lock()?.selector.set(model);
        Ok(())
    }

    pub fn has_credential(&self) -> Result<bool> {
        Ok(self.lock()?.credential.is_set())
    }

    /**
     * \brief Persist a new token and use it for subsequent sends.
     */
    pub fn save_token(&self, token: &str) -> Result<()> {
        self.lock()?.credential.save(token)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|_| anyhow!("chat session state poisoned"))
    }
}

/**
 * \brief Clears the loading flag on every exit path, including a dropped future.
 */
struct LoadingGuard {
    session: Arc<Mutex<Session>>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        session.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PuterClient;
    use crate::models::Role;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    type Calls = Arc<Mutex<Vec<(String, CompletionRequest)>>>;

    enum Reply {
        Json(Value),
        Fail(String),
    }

    /**
     * \brief Records every call and answers from a queue of canned replies.
     */
    struct ScriptedTransport {
        calls: Calls,
        replies: Mutex<VecDeque<Reply>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Reply>) -> (Self, Calls) {
            let calls: Calls = Arc::default();
            let transport = Self {
                calls: Arc::clone(&calls),
                replies: Mutex::new(replies.into()),
                gate: None,
            };
            (transport, calls)
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn complete(&self, token: &str, request: &CompletionRequest) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((token.to_string(), request.clone()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.replies.lock().unwrap().pop_front() {
                Some(Reply::Json(v)) => Ok(v),
                Some(Reply::Fail(msg)) => Err(anyhow!(msg)),
                None => Ok(json!({})),
            }
        }
    }

    fn store_with_token(token: Option<&str>) -> CredentialStore {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        let mut store = CredentialStore::load(conn).expect("load store");
        if let Some(t) = token {
            store.save(t).expect("save token");
        }
        store
    }

    fn reply(content: &str) -> Reply {
        Reply::Json(json!({"result": {"message": {"content": content}}}))
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let (transport, calls) = ScriptedTransport::new(vec![]);
        let controller = ChatController::new(store_with_token(Some("tok")), transport);

        for text in ["", "   ", "\n\t"] {
            let outcome = controller.send(text).await.unwrap();
            assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::Empty));
        }
        assert!(controller.messages().unwrap().is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_requires_configuration() {
        let (transport, calls) = ScriptedTransport::new(vec![reply("hi")]);
        let controller = ChatController::new(store_with_token(None), transport);

        let outcome = controller.send("hello").await.unwrap();
        assert_eq!(outcome, SendOutcome::ConfigurationRequired);
        assert!(controller.messages().unwrap().is_empty());
        assert!(calls.lock().unwrap().is_empty());
        assert!(!controller.is_loading().unwrap());
    }

    #[tokio::test]
    async fn test_successful_reply_appends_one_assistant_message() {
        let (transport, calls) = ScriptedTransport::new(vec![reply("hi")]);
        let controller = ChatController::new(store_with_token(Some("tok")), transport);

        let outcome = controller.send("  hello  ").await.unwrap();
        let msgs = controller.messages().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].content, "hi");
        assert_eq!(outcome, SendOutcome::Replied(msgs[1].clone()));
        assert!(!controller.is_loading().unwrap());

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "tok");
    }

    #[tokio::test]
    async fn test_transport_error_becomes_error_message() {
        let (transport, _calls) = ScriptedTransport::new(vec![Reply::Fail("timeout".into())]);
        let controller = ChatController::new(store_with_token(Some("tok")), transport);

        let outcome = controller.send("hello").await.unwrap();
        let msgs = controller.messages().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].role, Role::Assistant);
        assert!(msgs[1].content.contains("timeout"));
        assert_eq!(msgs[1].content, "Error: timeout");
        assert!(matches!(outcome, SendOutcome::Failed(_)));
        assert!(!controller.is_loading().unwrap());
    }

    #[tokio::test]
    async fn test_connection_refused_keeps_os_reason() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let client = PuterClient::new(format!("http://127.0.0.1:{}/drivers/call", port));
        let controller = ChatController::new(store_with_token(Some("tok")), client);

        let outcome = controller.send("hello").await.unwrap();
        let msg = outcome.message().expect("error message appended");
        assert!(matches!(outcome, SendOutcome::Failed(_)));
        assert!(msg.content.starts_with("Error: "), "{}", msg.content);
        assert!(
            msg.content.to_lowercase().contains("refused"),
            "{}",
            msg.content
        );
        assert!(!controller.is_loading().unwrap());
    }

    #[tokio::test]
    async fn test_logical_failure_and_blank_reason() {
        let (transport, _calls) = ScriptedTransport::new(vec![
            Reply::Json(json!({"success": false, "error": {"message": "quota exceeded"}})),
            Reply::Fail(String::new()),
        ]);
        let controller = ChatController::new(store_with_token(Some("tok")), transport);

        controller.send("one").await.unwrap();
        controller.send("two").await.unwrap();
        let msgs = controller.messages().unwrap();
        assert_eq!(msgs[1].content, "Error: quota exceeded");
        assert_eq!(msgs[3].content, format!("Error: {}", GENERIC_FAILURE_REASON));
    }

    #[tokio::test]
    async fn test_unknown_shape_uses_placeholder() {
        let (transport, _calls) =
            ScriptedTransport::new(vec![Reply::Json(json!({"success": true}))]);
        let controller = ChatController::new(store_with_token(Some("tok")), transport);

        let outcome = controller.send("hello").await.unwrap();
        assert_eq!(
            outcome.message().map(|m| m.content.as_str()),
            Some(llm::NO_RESPONSE_PLACEHOLDER)
        );
    }

    #[tokio::test]
    async fn test_outbound_messages_replay_transcript_with_model() {
        let (transport, calls) = ScriptedTransport::new(vec![
            reply("first answer"),
            Reply::Fail("boom".into()),
            reply("third answer"),
        ]);
        let controller = ChatController::new(store_with_token(Some("tok")), transport);

        controller.send("q1").await.unwrap();
        controller.send("q2").await.unwrap();
        controller.set_model(Model::Claude35Sonnet).unwrap();
        let before = controller.messages().unwrap();
        controller.send("q3").await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let last = &calls[2].1;
        assert_eq!(last.args.model, Model::Claude35Sonnet);
        let mut expected: Vec<ChatTurn> = before.iter().map(ChatTurn::from).collect();
        expected.push(ChatTurn {
            role: Role::User,
            content: "q3".to_string(),
        });
        assert_eq!(last.args.messages, expected);
        assert_eq!(calls[0].1.args.model, Model::Gpt4o);
    }

    #[tokio::test]
    async fn test_send_while_loading_is_dropped() {
        let gate = Arc::new(Notify::new());
        let (transport, calls) = ScriptedTransport::new(vec![reply("done")]);
        let controller = Arc::new(ChatController::new(
            store_with_token(Some("tok")),
            transport.gated(Arc::clone(&gate)),
        ));

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.send("first").await })
        };
        while !controller.is_loading().unwrap() {
            tokio::task::yield_now().await;
        }

        let second = controller.send("second").await.unwrap();
        assert_eq!(second, SendOutcome::Ignored(IgnoreReason::Busy));

        gate.notify_one();
        let first = first.await.expect("join").expect("send");
        assert!(matches!(first, SendOutcome::Replied(_)));
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(controller.messages().unwrap().len(), 2);
        assert!(!controller.is_loading().unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_send_clears_loading() {
        let gate = Arc::new(Notify::new());
        let (transport, _calls) = ScriptedTransport::new(vec![]);
        let controller = Arc::new(ChatController::new(
            store_with_token(Some("tok")),
            transport.gated(gate),
        ));

        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.send("hello").await })
        };
        while !controller.is_loading().unwrap() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert!(!controller.is_loading().unwrap());
        assert_eq!(controller.messages().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_token_unblocks_sending() {
        let (transport, calls) = ScriptedTransport::new(vec![reply("hi")]);
        let controller = ChatController::new(store_with_token(None), transport);

        assert_eq!(
            controller.send("hello").await.unwrap(),
            SendOutcome::ConfigurationRequired
        );
        controller.save_token("fresh").unwrap();
        assert!(controller.has_credential().unwrap());
        assert!(matches!(
            controller.send("hello").await.unwrap(),
            SendOutcome::Replied(_)
        ));
        assert_eq!(calls.lock().unwrap()[0].0, "fresh");
    }
}
