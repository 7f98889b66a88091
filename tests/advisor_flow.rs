//! End-to-end advisor flows with scripted LLM and deterministic embeddings.

mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::{docx, LetterEmbedder, ScriptedChat};
use contract_advisor::config::Config;
use contract_advisor::context::ContextMode;
use contract_advisor::embedding::DisabledEmbedder;
use contract_advisor::error::{AdvisorError, Envelope};
use contract_advisor::ledger::{HashLedger, LEDGER_FILE};
use contract_advisor::models::UserId;
use contract_advisor::session::RegisterOutcome;
use contract_advisor::tokens::TokenBudget;
use contract_advisor::Advisor;

fn advisor(tmp: &TempDir, llm: Arc<ScriptedChat>) -> Advisor {
    Advisor::new(Config::minimal_at(tmp.path()), llm, Arc::new(LetterEmbedder)).unwrap()
}

fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

#[tokio::test]
async fn uploaded_docx_is_injected_in_full() {
    let tmp = TempDir::new().unwrap();
    let llm = ScriptedChat::new();
    let advisor = advisor(&tmp, llm.clone());
    let alice = user("alice");

    let bytes = docx(&["Service Agreement between A and B", "Payment term: 30 days."]);
    let report = advisor.upload(&alice, "contract.docx", bytes).await.unwrap();
    assert_eq!(report.outcome, RegisterOutcome::New);
    assert_eq!(report.mode, ContextMode::Memory);
    assert_eq!(report.chunks, 1);

    llm.reply("The payment term is 30 days.");
    let outcome = advisor.chat(&alice, "What is the payment term?").await.unwrap();
    assert_eq!(outcome.response, "The payment term is 30 days.");
    assert_eq!(outcome.mode, ContextMode::Memory);

    let request = llm.last_request();
    assert_eq!(
        request.context.as_deref(),
        Some("Document 'contract.docx':\nService Agreement between A and B\n\nPayment term: 30 days.")
    );
    assert_eq!(request.user_turn, "What is the payment term?");
    assert!(request.history[0]
        .content
        .starts_with("Uploaded Document: contract.docx\n\nService Agreement"));
}

#[tokio::test]
async fn retrieval_mode_sends_ranked_chunks() {
    let tmp = TempDir::new().unwrap();
    let llm = ScriptedChat::new();
    let advisor = advisor(&tmp, llm.clone());
    let bob = user("bob");

    advisor
        .upload(&bob, "lease.txt", b"Lease of premises for office use.".to_vec())
        .await
        .unwrap();

    let refused = advisor.toggle_rag(&bob, true).await.unwrap();
    assert_eq!(refused.mode, ContextMode::Memory);
    assert!(refused.rejected.is_some());

    assert_eq!(advisor.release(&bob).await.unwrap(), 1);
    let enabled = advisor.toggle_rag(&bob, true).await.unwrap();
    assert_eq!(enabled.mode, ContextMode::Rag);
    assert!(enabled.rejected.is_none());

    advisor.chat(&bob, "What premises are leased?").await.unwrap();
    assert_eq!(
        llm.last_request().context.as_deref(),
        Some("Lease of premises for office use.")
    );

    // a new upload returns the session to memory mode
    let report = advisor
        .upload(&bob, "annex.txt", b"Annex 1: floor plan.".to_vec())
        .await
        .unwrap();
    assert_eq!(report.mode, ContextMode::Memory);
}

#[tokio::test]
async fn reuploading_identical_file_does_not_duplicate_records() {
    let tmp = TempDir::new().unwrap();
    let advisor = advisor(&tmp, ScriptedChat::new());
    let carol = user("carol");
    let bytes = b"Supply of goods. Delivery within 10 days.".to_vec();

    let first = advisor.upload(&carol, "supply.txt", bytes.clone()).await.unwrap();
    let second = advisor.upload(&carol, "supply.txt", bytes).await.unwrap();
    assert_eq!(first.indexed, 1);
    assert_eq!(second.indexed, 0);
    assert_eq!(second.outcome, RegisterOutcome::Unchanged);

    let session = advisor.session(&carol).await.unwrap();
    let session = session.lock().await;
    assert_eq!(session.store().count().await.unwrap(), 1);
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn clearing_user_data_empties_store_and_ledger() {
    let tmp = TempDir::new().unwrap();
    let advisor = advisor(&tmp, ScriptedChat::new());
    let dave = user("dave");

    advisor
        .upload(&dave, "a.txt", b"Work contract terms.".to_vec())
        .await
        .unwrap();
    advisor.release(&dave).await.unwrap();
    assert_eq!(advisor.toggle_rag(&dave, true).await.unwrap().mode, ContextMode::Rag);

    advisor.clear_user_data(&dave).await.unwrap();

    let ledger_path = tmp.path().join("dave").join(LEDGER_FILE);
    assert_eq!(std::fs::read_to_string(&ledger_path).unwrap(), "");
    {
        let session = advisor.session(&dave).await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.store().count().await.unwrap(), 0);
        assert_eq!(session.mode(), ContextMode::Memory);
    }

    let toggle = advisor.toggle_rag(&dave, true).await.unwrap();
    assert_eq!(toggle.mode, ContextMode::Memory);
    assert!(toggle.rejected.unwrap().contains("empty"));
}

#[tokio::test]
async fn readiness_follows_conversation() {
    let tmp = TempDir::new().unwrap();
    let llm = ScriptedChat::new();
    let advisor = advisor(&tmp, llm.clone());
    let eve = user("eve");

    llm.reply("Who are the parties?");
    llm.reply("What are the payment obligations?");
    llm.reply("I believe I now have enough information to recommend a contract.");

    let a = advisor
        .chat(&eve, "I need a contract; the subject matter is web development.")
        .await
        .unwrap();
    assert!(!a.ready_for_recommendation);
    advisor
        .chat(&eve, "The parties are Tech LLC and Ivanov.")
        .await
        .unwrap();
    let c = advisor
        .chat(&eve, "Payment monthly, standard terms.")
        .await
        .unwrap();
    assert!(c.ready_for_recommendation);

    llm.reply("Contract type: Service agreement\n\nKey terms: monthly payment\n\nThanks");
    let rec = advisor.recommend(&eve).await.unwrap();
    assert!(rec.ready_for_recommendation);
    assert_eq!(rec.recommendation.get("Contract type"), Some("Service agreement"));
    assert_eq!(rec.recommendation.len(), 2);
    assert!(llm
        .last_request()
        .user_turn
        .starts_with("human: I need a contract"));
}

#[tokio::test]
async fn failed_turn_leaves_history_untouched() {
    let tmp = TempDir::new().unwrap();
    let llm = ScriptedChat::new();
    let advisor = advisor(&tmp, llm.clone());
    let frank = user("frank");

    advisor.chat(&frank, "hello").await.unwrap();
    llm.fail("provider down");
    let err = advisor.chat(&frank, "are you there?").await.unwrap_err();
    assert!(matches!(err, AdvisorError::Generation(_)));

    let envelope = serde_json::to_value(Envelope::<()>::from(Err(err))).unwrap();
    assert_eq!(envelope["success"], false);

    {
        let session = advisor.session(&frank).await.unwrap();
        assert_eq!(session.lock().await.history().len(), 2);
    }
    assert!(advisor.chat(&frank, "retry").await.is_ok());
}

#[tokio::test]
async fn embedding_outage_keeps_document_in_memory() {
    let tmp = TempDir::new().unwrap();
    let llm = ScriptedChat::new();
    let advisor = Advisor::new(
        Config::minimal_at(tmp.path()),
        llm.clone(),
        Arc::new(DisabledEmbedder),
    )
    .unwrap();
    let gina = user("gina");

    let report = advisor
        .upload(&gina, "a.txt", b"Penalty clause text.".to_vec())
        .await
        .unwrap();
    assert_eq!(report.indexed, 0);
    assert!(report.indexing_error.is_some());

    advisor.chat(&gina, "Any penalties?").await.unwrap();
    assert!(llm
        .last_request()
        .context
        .unwrap()
        .contains("Penalty clause text."));
}

#[tokio::test]
async fn unsupported_upload_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let advisor = advisor(&tmp, ScriptedChat::new());
    let err = advisor
        .upload(&user("hank"), "notes.rtf", b"{\\rtf1}".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, AdvisorError::UnsupportedFormat(_)));
}

#[tokio::test]
async fn durable_state_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let ivy = user("ivy");
    {
        let advisor = advisor(&tmp, ScriptedChat::new());
        advisor
            .upload(&ivy, "scan 10:30.txt", b"Confidentiality obligations.".to_vec())
            .await
            .unwrap();
    }

    let ledger = HashLedger::for_user(tmp.path(), &ivy).unwrap();
    assert!(ledger.get("scan 10:30.txt").is_some());

    let advisor = advisor(&tmp, ScriptedChat::new());
    // the in-memory registry is gone, so retrieval can be enabled directly
    let toggle = advisor.toggle_rag(&ivy, true).await.unwrap();
    assert_eq!(toggle.mode, ContextMode::Rag);

    let report = advisor
        .upload(&ivy, "scan 10:30.txt", b"Confidentiality obligations.".to_vec())
        .await
        .unwrap();
    assert_eq!(report.outcome, RegisterOutcome::Unchanged);
    assert_eq!(report.indexed, 0);
}

#[tokio::test]
async fn users_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let advisor = advisor(&tmp, ScriptedChat::new());
    let a = user("a1");
    let b = user("b1");

    advisor.upload(&a, "x.txt", b"alpha".to_vec()).await.unwrap();
    let session_b = advisor.session(&b).await.unwrap();
    let session_b = session_b.lock().await;
    assert!(session_b.documents().is_empty());
    assert_eq!(session_b.store().count().await.unwrap(), 0);
    assert!(tmp.path().join("a1").join("vectors.sqlite").exists());
}

#[tokio::test]
async fn retrieval_turns_do_not_resend_document_text() {
    let tmp = TempDir::new().unwrap();
    let llm = ScriptedChat::new();
    let advisor = advisor(&tmp, llm.clone());
    let kim = user("kim");

    let clause = "The contractor shall deliver each milestone on schedule. ";
    let body = clause.repeat(30_000 / clause.len());
    advisor
        .upload(&kim, "big.txt", body.clone().into_bytes())
        .await
        .unwrap();
    advisor.chat(&kim, "Summarize the milestones").await.unwrap();
    assert!(llm.last_request().history[0].content.contains(&body));

    advisor.release(&kim).await.unwrap();
    assert_eq!(advisor.toggle_rag(&kim, true).await.unwrap().mode, ContextMode::Rag);
    advisor.chat(&kim, "When are milestones due?").await.unwrap();

    let request = llm.last_request();
    assert!(request
        .history
        .iter()
        .all(|m| !m.content.starts_with("Uploaded Document:")));
    let history_chars: usize = request.history.iter().map(|m| m.content.len()).sum();
    assert!(history_chars < 1_000);

    let context = request.context.unwrap();
    let tokens = TokenBudget::cl100k().unwrap();
    assert!(tokens.count(&context) <= 1500);
    assert!(context.len() < body.len());
}

#[tokio::test]
async fn changed_reupload_replaces_indexed_version() {
    let tmp = TempDir::new().unwrap();
    let llm = ScriptedChat::new();
    let advisor = advisor(&tmp, llm.clone());
    let lee = user("lee");

    advisor
        .upload(&lee, "c.txt", b"Payment within 30 days.".to_vec())
        .await
        .unwrap();
    let second = advisor
        .upload(&lee, "c.txt", b"Payment within 90 days.".to_vec())
        .await
        .unwrap();
    assert_eq!(second.outcome, RegisterOutcome::Changed);
    assert_eq!(second.indexed, 1);

    {
        let session = advisor.session(&lee).await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.store().count().await.unwrap(), 1);
        assert_eq!(
            session.ledger().get("c.txt"),
            Some(contract_advisor::extract::sha256_hex(b"Payment within 90 days.").as_str())
        );
    }

    advisor.release(&lee).await.unwrap();
    advisor.toggle_rag(&lee, true).await.unwrap();
    advisor.chat(&lee, "What is the payment term?").await.unwrap();
    assert_eq!(
        llm.last_request().context.as_deref(),
        Some("Payment within 90 days.")
    );
}

#[tokio::test]
async fn storage_operations_need_no_llm_backend() {
    let tmp = TempDir::new().unwrap();
    let advisor = Advisor::from_config(Config::minimal_at(tmp.path())).unwrap();
    let mia = user("mia");

    let report = advisor
        .upload(&mia, "a.txt", b"Lease terms.".to_vec())
        .await
        .unwrap();
    assert_eq!(report.outcome, RegisterOutcome::New);
    advisor.clear_user_data(&mia).await.unwrap();
}
