//! The per-delivery pipeline.
//!
//! Stages run strictly in order: gate, sanitizer, knowledge load, question
//! log, responder, sender.  Gate, sanitizer and knowledge load can halt the
//! delivery; everything after them degrades instead of failing.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::HaltReason;
use crate::gate::RequestGate;
use crate::knowledge::KnowledgeDocument;
use crate::question_log::QuestionLog;
use crate::responder::{CompletionSettings, KnowledgeResponder};
use crate::sanitize::InputSanitizer;
use crate::security_log::SecurityLog;
use crate::sender::ReplySender;

/// Terminal outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Replied {
        chat_id: i64,
        question: String,
        reply: String,
        logged: bool,
        delivered: bool,
    },
    Halted(HaltReason),
}

pub struct Pipeline {
    config: Arc<AppConfig>,
    gate: RequestGate,
    sanitizer: InputSanitizer,
    knowledge_path: PathBuf,
    question_log: QuestionLog,
    responder: KnowledgeResponder,
    sender: ReplySender,
}

impl Pipeline {
    pub fn new(
        config: Arc<AppConfig>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, reqwest::Error> {
        let security_log = Arc::new(SecurityLog::new(
            config.security_log_file.clone(),
            &config.rotation,
            diagnostics.clone(),
        ));
        let responder = KnowledgeResponder::new(
            CompletionSettings {
                url: config.completions_url.clone(),
                api_key: config.api_key.clone(),
                model: config.model.clone(),
                max_tokens: config.max_tokens,
                timeout_ms: config.upstream_timeout_ms,
            },
            diagnostics.clone(),
        )?;
        let sender = ReplySender::new(&config.telegram_api, &config.bot_token, diagnostics.clone())?;
        Ok(Self {
            gate: RequestGate::new(config.allowed_ranges.clone()),
            sanitizer: InputSanitizer::new(config.max_text_chars, security_log),
            knowledge_path: PathBuf::from(&config.knowledge_file),
            question_log: QuestionLog::new(&config.question_log_file, diagnostics),
            responder,
            sender,
            config,
        })
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub async fn handle(&self, caller: IpAddr, body: &[u8]) -> Outcome {
        match self.run(caller, body).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::info!(%caller, code = reason.code(), class = reason.class().as_str(), "delivery halted");
                Outcome::Halted(reason)
            }
        }
    }

    async fn run(&self, caller: IpAddr, body: &[u8]) -> Result<Outcome, HaltReason> {
        self.gate.check_origin(caller)?;
        self.gate.check_bot_token(&self.config.bot_token)?;
        let update = self.gate.parse_update(body)?;
        let question = self.sanitizer.check(&update.text)?;
        let knowledge = KnowledgeDocument::load(&self.knowledge_path)
            .map_err(|e| HaltReason::KnowledgeUnavailable(e.to_string()))?;

        let logged = self.question_log.append(update.chat_id, &question);
        let reply = self.responder.respond(&question, &knowledge).await;
        let delivered = self.sender.send(update.chat_id, &reply).await;
        tracing::info!(chat_id = update.chat_id, logged, delivered, "delivery handled");

        Ok(Outcome::Replied {
            chat_id: update.chat_id,
            question,
            reply,
            logged,
            delivered,
        })
    }
}
