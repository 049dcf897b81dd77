//! Prompt construction and input sanitization for judgment backends.

use std::sync::LazyLock;

use regex::Regex;

use crate::classifier::vote::{Verdict, VoteLabels};

/// Max chars of post text sent to backends.
pub const MAX_PROMPT_TEXT_CHARS: usize = 2000;

/// Replacement for URLs in the post text.
pub const URL_PLACEHOLDER: &str = "(ссылка)";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("static regex"));

static DISALLOWED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w.,:;!?%()'\-–— \n]+").expect("static regex"));

/// Editorial guidelines for the destination feed.
const GUIDELINES: &str = "\
Ты помогаешь редактору Telegram-канала об арбитраже трафика решать, какие посты публиковать.

Не пропускай:
- личные заметки, мотивацию, рассуждения и мнения без фактов
- рекламу общего характера и нецелевые офферы
- тексты ни о чём, без действий, цифр или результатов
- интервью, подкасты и записи бесед
- розыгрыши, конкурсы и раздачи подарков
- анонсы вечеринок, конференций, митапов и встреч
- длинные колонки без связок, инструментов, цифр или кейсов
- жалобы, наблюдения и истории рынка

Пропускай только то, что даёт арбитражнику конкретную пользу:
- кейсы, схемы, цифры, инсайты, таблицы и практические советы
- связки, источники трафика, подходы, сравнения офферов и платформ
- инструменты, спай-сервисы, автоматизацию, API, скрипты и парсеры
- обзоры и новости ИИ-инструментов
- новости платформ, трекеров, платёжных систем, банов и обновлений

Если конкретной пользы нет, пост бесполезен. Будь строгим.";

/// Post text prepared for a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    /// Char count after cleaning, before truncation.
    pub cleaned_chars: usize,
    pub truncated: bool,
}

/// Clean post text before it is embedded in a prompt.
///
/// Double quotes become single quotes, newlines become spaces, URLs are
/// replaced with [`URL_PLACEHOLDER`], characters outside the allowed set are
/// removed, and the result is trimmed and cut to [`MAX_PROMPT_TEXT_CHARS`].
pub fn sanitize(text: &str) -> SanitizedText {
    let text = text.replace('"', "'").replace(['\r', '\n'], " ");
    let text = URL_RE.replace_all(&text, URL_PLACEHOLDER);
    let text = DISALLOWED_RE.replace_all(&text, "");
    let text = text.trim();

    let cleaned_chars = text.chars().count();
    let truncated = cleaned_chars > MAX_PROMPT_TEXT_CHARS;
    let text = if truncated {
        text.chars().take(MAX_PROMPT_TEXT_CHARS).collect()
    } else {
        text.to_string()
    };

    SanitizedText {
        text,
        cleaned_chars,
        truncated,
    }
}

/// Full prompt for one post. `clean_text` must already be sanitized.
pub fn build_prompt(clean_text: &str, labels: &VoteLabels) -> String {
    let choices = Verdict::ALL
        .iter()
        .map(|v| labels.label(*v))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{GUIDELINES}\n\nТекст поста:\n\"{clean_text}\"\n\nОтветь одним словом, только одним из вариантов: {choices}."
    )
}
