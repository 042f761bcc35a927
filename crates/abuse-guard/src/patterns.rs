//! Attack rule catalogue.
//!
//! Contains the static catalogue of detection rules the classifier evaluates
//! against inbound chat messages.  Each entry carries a short name, an
//! [`AttackCategory`], the [`Severity`] assigned when it fires, and a matcher
//! that is compiled at classifier-construction time.
//!
//! Catalogue order is a behavioral contract: rules are evaluated top to
//! bottom and the first match wins, so the category groups below must stay in
//! their fixed priority order (prompt injection, command execution,
//! reconnaissance, spam, token exhaustion).  The oversize check is not a
//! catalogue entry; it runs before any rule is consulted.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// The family of abuse a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackCategory {
    /// Attempts to override or replace the assistant's instructions.
    PromptInjection,
    /// Attempts to get the assistant to execute shell commands or code.
    CommandExecution,
    /// Attempts to extract information about the model, prompt, or keys.
    Reconnaissance,
    /// Repeated-character or repeated-token flood shapes.
    Spam,
    /// Requests for implausibly large generated output.
    TokenExhaustion,
    /// The message itself exceeds the configured length limit.
    Oversize,
}

impl AttackCategory {
    /// Stable snake_case identifier used in logs and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptInjection => "prompt_injection",
            Self::CommandExecution => "command_execution",
            Self::Reconnaissance => "reconnaissance",
            Self::Spam => "spam",
            Self::TokenExhaustion => "token_exhaustion",
            Self::Oversize => "oversize",
        }
    }

    /// Short description used when building an attack report.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::PromptInjection => "prompt injection attempt",
            Self::CommandExecution => "command execution attempt",
            Self::Reconnaissance => "system reconnaissance attempt",
            Self::Spam => "spam or nonsense flood",
            Self::TokenExhaustion => "oversized generation request",
            Self::Oversize => "message exceeds the length limit",
        }
    }

    /// The canned user-facing reply substituted for a flagged message.
    ///
    /// A flagged message is never forwarded to the LLM provider; the
    /// orchestrator answers with this text instead.
    pub fn canned_reply(&self) -> &'static str {
        match self {
            Self::PromptInjection => {
                "I noticed an attempt to change my instructions. That won't work. \
                 How can I actually help you?"
            }
            Self::CommandExecution => "I don't execute system commands. How can I help?",
            Self::Reconnaissance => {
                "I don't share technical details about myself. What else can I do for you?"
            }
            Self::Spam => "Please phrase your question more clearly.",
            Self::TokenExhaustion | Self::Oversize => {
                "Sorry, I can't produce texts that large. Try narrowing your request."
            }
        }
    }
}

impl fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Ordinal attack impact. Ordering matters: `Critical` bans immediately,
/// `High` and above are forwarded to the alert channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rule definition
// ---------------------------------------------------------------------------

/// How a rule matches message text.
pub enum MatcherSpec {
    /// A regex tested anywhere in the message.
    Regex(&'static str),
    /// The same character repeated at least `min_run` times in a row.
    /// The `regex` crate has no backreferences, so this shape is matched in
    /// code instead of with `(.)\1{n,}`.
    CharRun { min_run: usize },
}

/// A single detection rule.
pub struct AttackRule {
    /// Short snake_case identifier used in logs and reports.
    pub name: &'static str,
    pub category: AttackCategory,
    pub severity: Severity,
    pub matcher: MatcherSpec,
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

/// The built-in rule catalogue, in evaluation order.
///
/// Messages from the widget arrive in whatever language the visitor types,
/// so the phrasing rules cover Latin and Cyrillic variants.
pub static RULES: &[AttackRule] = &[
    // ---- Prompt injection (high) ---------------------------------------
    AttackRule {
        name: "ignore_previous",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(
            r"(?i)\b(ignore|disregard|forget)\s+(all\s+|the\s+)?(previous|prior|above)\b",
        ),
    },
    AttackRule {
        name: "new_instructions",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(r"(?i)\bnew\s+instructions?\b"),
    },
    AttackRule {
        name: "system_tag",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(r"(?i)<\s*system\s*>|\[\s*system\s*\]"),
    },
    AttackRule {
        name: "system_role_header",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(r"(?i)\bsystem\s*:"),
    },
    AttackRule {
        name: "role_hijack",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(r"(?i)\byou\s+are\s+now\b|\bты\s+теперь\b"),
    },
    AttackRule {
        name: "act_as_if",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(r"(?i)\bact\s+as\s+if\b"),
    },
    AttackRule {
        name: "pretend_to_be",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(r"(?i)\bpretend\s+(you|to\s+be)\b"),
    },
    AttackRule {
        name: "roleplay_as",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(r"(?i)\broleplay\s+as\b"),
    },
    AttackRule {
        name: "forced_language",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(
            r"(?i)\brespond\s+in\s+(chinese|arabic|korean)\b|\btranslate\s+everything\s+to\b|\bпереведи\s+вс[её]\s+на\b",
        ),
    },
    AttackRule {
        name: "ignore_previous_ru",
        category: AttackCategory::PromptInjection,
        severity: Severity::High,
        matcher: MatcherSpec::Regex(
            r"(?i)\b(игнорируй|забудь)\s+(предыдущ|вс[её]|выше)|\bновые\s+инструкции\b",
        ),
    },
    // ---- Command execution (critical) ----------------------------------
    AttackRule {
        name: "code_eval",
        category: AttackCategory::CommandExecution,
        severity: Severity::Critical,
        matcher: MatcherSpec::Regex(r"(?i)\b(exec|eval)\s*\("),
    },
    AttackRule {
        name: "os_escape",
        category: AttackCategory::CommandExecution,
        severity: Severity::Critical,
        matcher: MatcherSpec::Regex(
            r"(?i)\bos\s*\.\s*system\b|\bsubprocess\b|__import__|\bimport\s+os\b",
        ),
    },
    AttackRule {
        name: "sensitive_paths",
        category: AttackCategory::CommandExecution,
        severity: Severity::Critical,
        matcher: MatcherSpec::Regex(
            r"(?i)cat\s+/etc/|cat\s+~?/?\.ssh|\brm\s+-rf\b|/bin/(ba)?sh\b",
        ),
    },
    AttackRule {
        name: "pipe_to_shell",
        category: AttackCategory::CommandExecution,
        severity: Severity::Critical,
        matcher: MatcherSpec::Regex(r"(?i)\b(curl|wget)\s+\S+[^|]*\|"),
    },
    AttackRule {
        name: "run_command_phrase",
        category: AttackCategory::CommandExecution,
        severity: Severity::Critical,
        matcher: MatcherSpec::Regex(
            r"(?i)\b(execute|run|shell)\s+(a\s+|the\s+)?command\b|\bвыполни\s+команду\b|\bзапусти\s+скрипт\b",
        ),
    },
    // ---- Reconnaissance (medium) ----------------------------------------
    AttackRule {
        name: "model_probe",
        category: AttackCategory::Reconnaissance,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\bwhat\s+(model|ai|llm)\s+are\s+you\b|\bкакая\s+ты\s+модель\b",
        ),
    },
    AttackRule {
        name: "api_key_probe",
        category: AttackCategory::Reconnaissance,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\byour\s+api\s+key\b|\bтвой\s+api\s+ключ\b|\bкакой\s+у\s+тебя\s+api\b",
        ),
    },
    AttackRule {
        name: "config_probe",
        category: AttackCategory::Reconnaissance,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\bshow\s+(me\s+)?your\s+(config|settings|prompt)\b|\bпокажи\s+(свой\s+)?(конфиг|настройки|промпт)",
        ),
    },
    AttackRule {
        name: "system_prompt_probe",
        category: AttackCategory::Reconnaissance,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\bwhat\s+is\s+your\s+system\s+prompt\b|\bкакой\s+твой\s+системный\s+промпт\b",
        ),
    },
    AttackRule {
        name: "dump_probe",
        category: AttackCategory::Reconnaissance,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\b(dump|print)\s+(your\s+)?(memory|context|instructions|prompt)\b",
        ),
    },
    // ---- Spam (low) ------------------------------------------------------
    AttackRule {
        name: "repeated_char",
        category: AttackCategory::Spam,
        severity: Severity::Low,
        matcher: MatcherSpec::CharRun { min_run: 11 },
    },
    AttackRule {
        name: "repeated_token",
        category: AttackCategory::Spam,
        severity: Severity::Low,
        matcher: MatcherSpec::Regex(r"(?i)(test\s*){5,}"),
    },
    // Case-sensitive on purpose: an all-lowercase flood and an all-caps
    // flood are distinct shapes.
    AttackRule {
        name: "lowercase_flood",
        category: AttackCategory::Spam,
        severity: Severity::Low,
        matcher: MatcherSpec::Regex(r"^[a-zа-я]{50,}$"),
    },
    AttackRule {
        name: "uppercase_flood",
        category: AttackCategory::Spam,
        severity: Severity::Low,
        matcher: MatcherSpec::Regex(r"^[A-ZА-Я]{50,}$"),
    },
    // ---- Token exhaustion (medium) --------------------------------------
    AttackRule {
        name: "long_story_request",
        category: AttackCategory::TokenExhaustion,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\bwrite\s+(a\s+|an\s+)?(story|essay|text)\s+(of\s+)?\d{3,}\s+(words|characters)\b|\bнапиши\s+(рассказ|историю|текст|эссе)\s+на\s+\d{3,}\s+(слов|символов)",
        ),
    },
    AttackRule {
        name: "bulk_generation",
        category: AttackCategory::TokenExhaustion,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\bgenerate\s+\d{3,}\s+(words|characters|lines)\b|\bсгенерируй\s+\d{3,}\s+(слов|символов|строк)",
        ),
    },
    AttackRule {
        name: "repeat_n_times",
        category: AttackCategory::TokenExhaustion,
        severity: Severity::Medium,
        matcher: MatcherSpec::Regex(
            r"(?i)\brepeat\s+.+\s+\d{3,}\s+times\b|\bповтори\s+.+\s+\d{3,}\s+раз",
        ),
    },
];
