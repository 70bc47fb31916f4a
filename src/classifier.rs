//! Intent Classifier
//!
//! Routes a user message to one of six intents using static vocabularies.
//! Pure and total: no I/O, every input maps to exactly one intent.

use crate::models::{HistoryMessage, Intent, MessageRole};
use crate::text::rune_count;

/// A vocabulary matched either by whole token or by substring stem.
/// Short English words need token matching ("hi" must not hit "this").
struct Vocabulary {
    words: &'static [&'static str],
    stems: &'static [&'static str],
}

impl Vocabulary {
    fn matches(&self, lowered: &str, tokens: &[&str]) -> bool {
        self.words.iter().any(|w| tokens.contains(w))
            || self.stems.iter().any(|s| lowered.contains(s))
    }
}

/// Static keyword lists
const DEBUG: Vocabulary = Vocabulary {
    words: &["bug", "bugs", "crash", "crashed", "panic", "exception", "traceback", "broken"],
    stems: &[
        "error", "stack trace", "stacktrace", "doesn't work", "does not work", "not working",
        "freezes", "ошибк", "баг", "сбой", "падает", "вылет", "не работает", "зависа",
        "исключени", "трассировк",
    ],
};

const TRADING_STRUCTURED: Vocabulary = Vocabulary {
    words: &["roi", "filter", "filters", "parameter", "parameters", "spread", "risk", "risks"],
    stems: &[
        "decision matrix", "min profit", "min_profit", "max price", "min price", "min volume",
        "profit threshold", "composite score", "risk score", "risk level", "risk/reward",
        "stop loss", "stop-loss", "drawdown", "liquidity", "volatility", "матриц", "фильтр",
        "параметр", "спред", "риск", "ликвидн", "волатильн", "просадк",
    ],
};

const PRODUCT_HELP: Vocabulary = Vocabulary {
    words: &["docs", "wiki", "readme", "roadmap", "feature", "features", "tutorial", "guide"],
    stems: &[
        "documentation", "how to use", "how do i", "how can i", "install", "set up", "setup",
        "документац", "вики", "инструкц", "функци", "как использовать", "как настроить",
        "дорожн", "возможност", "установ",
    ],
};

const WEB_RESEARCH: Vocabulary = Vocabulary {
    words: &["google", "news", "latest", "recent", "internet", "online"],
    stems: &[
        "search the web", "web search", "look up", "what's new", "update on", "новост",
        "последн", "свежи", "в интернете", "в сети", "поищи", "загугли",
    ],
};

const GENERAL_TRADING: Vocabulary = Vocabulary {
    words: &[
        "trade", "trades", "trading", "scan", "scanner", "margin", "order", "orders", "buy",
        "sell", "profit", "profitable", "price", "prices", "market", "flip", "items",
    ],
    stems: &[
        "сделк", "скан", "марж", "ордер", "заявк", "купить", "продать", "прибыл", "цен",
        "рынок", "рынк", "торг", "флип",
    ],
};

const GREETINGS: Vocabulary = Vocabulary {
    words: &[
        "hi", "hello", "hey", "yo", "thanks", "thx", "привет", "здравствуй", "здравствуйте",
        "спасибо", "хай", "салют",
    ],
    stems: &[
        "good morning", "good evening", "good afternoon", "thank you", "how are you",
        "добрый день", "добрый вечер", "доброе утро", "как дела",
    ],
};

const FOLLOW_UP: Vocabulary = Vocabulary {
    words: &["why", "explain", "next", "more", "почему", "зачем", "объясни", "поясни", "дальше", "подробнее"],
    stems: &["what next", "and then", "what about", "tell me more", "что дальше", "а если"],
};

const ADVICE: Vocabulary = Vocabulary {
    words: &["buy", "sell", "trade", "trades", "profit"],
    stems: &["recommend", "risk", "рекоменд", "риск", "сделк", "купи", "прода", "прибыл"],
};

const SMALLTALK_MAX_RUNES: usize = 40;
const FOLLOW_UP_MAX_RUNES: usize = 80;
const FOLLOW_UP_LOOKBACK: usize = 4;

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify a message given the trailing conversation history
    pub fn classify(message: &str, history: &[HistoryMessage]) -> Intent {
        let lowered = message.trim().to_lowercase();
        let tokens = tokenize(&lowered);

        if DEBUG.matches(&lowered, &tokens) {
            return Intent::DebugSupport;
        }
        if TRADING_STRUCTURED.matches(&lowered, &tokens) {
            return Intent::TradingAnalysis;
        }
        if PRODUCT_HELP.matches(&lowered, &tokens) {
            return Intent::ProductHelp;
        }
        if WEB_RESEARCH.matches(&lowered, &tokens) {
            return Intent::WebResearch;
        }
        if GENERAL_TRADING.matches(&lowered, &tokens) {
            return Intent::TradingAnalysis;
        }

        let runes = rune_count(&lowered);
        if runes <= SMALLTALK_MAX_RUNES && GREETINGS.matches(&lowered, &tokens) {
            return Intent::Smalltalk;
        }

        if runes <= FOLLOW_UP_MAX_RUNES
            && FOLLOW_UP.matches(&lowered, &tokens)
            && recent_advice(history)
        {
            return Intent::TradingAnalysis;
        }

        Intent::General
    }
}

fn tokenize(lowered: &str) -> Vec<&str> {
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .collect()
}

/// Did one of the last assistant turns talk about trades or risk?
fn recent_advice(history: &[HistoryMessage]) -> bool {
    history
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant)
        .take(FOLLOW_UP_LOOKBACK)
        .any(|m| {
            let lowered = m.content.to_lowercase();
            ADVICE.matches(&lowered, &tokenize(&lowered))
        })
}
