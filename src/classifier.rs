//! Intent Classifier
//!
//! Classifies the user's latest instruction as one of:
//! - Greeting: nothing to look up or execute ("hi", "谢谢")
//! - Lookup: information only ("what is the eth price", "aave 最新新闻")
//! - Action: on-chain work ("deposit 0.001 WETH into Aave", "查余额")
//! - LookupThenAct: an explicit "look up, then act" sequence
//!   ("check the eth price, then deposit 0.001 WETH")
//!
//! The hand-off from analyst to executor is only allowed for LookupThenAct,
//! and that needs a lookup keyword, a sequencing marker and an action keyword
//! in that order.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Lookup,
    Action,
    LookupThenAct,
}

/// Static keyword lists, matched on the lowercased text
const LOOKUP_KEYWORDS: &[&str] = &[
    // Prices
    "price", "prices", "worth", "价格", "多少钱", "币价",
    // News & sentiment
    "news", "sentiment", "trend", "新闻", "行情", "情绪", "趋势", "消息",
    // Analysis & research
    "analysis", "analyze", "analyse", "research", "report", "market",
    "分析", "研报", "市场", "白皮书", "whitepaper",
    // Concepts
    "explain", "what is", "what are", "tell me", "how does", "why",
    "什么是", "解释", "介绍", "为什么", "怎么", "如何",
    "impermanent", "liquidity", "无常损失", "流动性",
];

const ACTION_KEYWORDS: &[&str] = &[
    // Aave
    "deposit", "supply", "存入", "存款", "存钱", "存到",
    // Allowance
    "approve", "approval", "allowance", "授权",
    // Wrapping
    "swap", "wrap", "兑换", "换成", "换为",
    // Wallet
    "balance", "余额",
];

const SEQUENCE_MARKERS: &[&str] = &[
    "then", "after that", "afterwards", "and if", "based on",
    "然后", "之后", "接着", "再把", "再存", "如果", "根据",
];

/// Openers of a concept question ("how does approve work?")
const QUESTION_PREFIXES: &[&str] = &[
    "what is", "what are", "what's", "how does", "how do", "why", "explain",
    "tell me about", "什么是", "解释", "介绍", "为什么", "如何理解", "怎么理解",
];

/// Phrases that point at the user's own wallet
const WALLET_MARKERS: &[&str] = &[
    "my ", "balance", "帮我", "给我", "我的", "余额",
];

const POLITE_PREFIXES: &[&str] = &[
    "please ", "pls ", "can you ", "could you ", "请", "麻烦", "把",
];

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "bye", "gm",
    "你好", "您好", "嗨", "谢谢", "再见", "早上好", "晚上好",
];

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify one user instruction
    pub fn classify(text: &str) -> Intent {
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return Intent::Greeting;
        }

        let lookup_at = first_match(&lowered, LOOKUP_KEYWORDS);
        let action_at = first_match(&lowered, ACTION_KEYWORDS);

        match (lookup_at, action_at) {
            (Some(lookup), Some(action)) => {
                let sequenced = first_match(&lowered, SEQUENCE_MARKERS)
                    .map(|marker| lookup < marker && marker < action)
                    .unwrap_or(false);
                if sequenced {
                    Intent::LookupThenAct
                } else if is_question(&lowered) && !is_imperative(&lowered) {
                    Intent::Lookup
                } else {
                    Intent::Action
                }
            }
            (None, Some(_)) => Intent::Action,
            (Some(_), None) => Intent::Lookup,
            (None, None) => {
                if is_greeting(&lowered) {
                    Intent::Greeting
                } else if lowered.ends_with('?') || lowered.ends_with('？') {
                    Intent::Lookup
                } else {
                    Intent::Greeting
                }
            }
        }
    }
}

fn is_question(text: &str) -> bool {
    text.ends_with('?')
        || text.ends_with('？')
        || QUESTION_PREFIXES.iter().any(|p| find_keyword(text, p) == Some(0))
}

/// An instruction to act: leads with an action verb, names an amount, or
/// refers to the user's own wallet.
fn is_imperative(text: &str) -> bool {
    let mut body = text;
    while let Some(rest) = POLITE_PREFIXES.iter().find_map(|p| body.strip_prefix(p)) {
        body = rest.trim_start();
    }

    first_match(body, ACTION_KEYWORDS) == Some(0)
        || has_eth_amount(text)
        || WALLET_MARKERS.iter().any(|m| text.contains(m))
}

/// A number followed by an ETH or WETH unit ("0.001 weth", "1eth").
fn has_eth_amount(text: &str) -> bool {
    text.char_indices()
        .filter(|(_, c)| c.is_ascii_digit())
        .any(|(idx, _)| {
            let rest = text[idx..].trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');
            let rest = rest.trim_start();
            rest.starts_with("eth") || rest.starts_with("weth")
        })
}

fn is_greeting(text: &str) -> bool {
    let stripped = text.trim_matches(|c: char| !c.is_alphanumeric() && !is_cjk(c));
    GREETINGS.iter().any(|g| stripped == *g || stripped.starts_with(&format!("{} ", g)))
        || (stripped.chars().count() <= 6 && GREETINGS.iter().any(|g| !g.is_ascii() && stripped.contains(g)))
}

/// Byte offset of the earliest keyword hit. ASCII keywords must sit on word
/// boundaries so "then" does not match "authentic".
fn first_match(text: &str, keywords: &[&str]) -> Option<usize> {
    keywords
        .iter()
        .filter_map(|kw| find_keyword(text, kw))
        .min()
}

fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    if !keyword.is_ascii() {
        return text.find(keyword);
    }

    text.match_indices(keyword).map(|(idx, _)| idx).find(|&idx| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + keyword.len()..].chars().next();
        !before.map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
            && !after.map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
    })
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_requests() {
        let cases = vec![
            "what is the eth price",
            "aave 最新新闻",
            "explain impermanent loss",
            "现在 ETH 多少钱",
            "is staking safe?",
            "how does approve work?",
            "what is an approval?",
            "什么是授权？",
            "explain aave deposit",
            "why do i need to wrap eth before depositing?",
        ];

        for c in cases {
            assert_eq!(IntentClassifier::classify(c), Intent::Lookup, "{}", c);
        }
    }

    #[test]
    fn test_action_requests() {
        let cases = vec![
            "deposit 0.001 WETH into Aave",
            "把 0.0001 WETH 存入 Aave",
            "approve weth",
            "what is my balance",
            "swap 0.01 eth to weth",
            // execution first, lookup after: no reverse hand-off
            "deposit 0.001 weth then check the price",
            // questions that still ask for execution
            "can you deposit 0.01 weth into aave?",
            "please approve weth for aave?",
            "how do i deposit 0.001 weth?",
            "帮我授权 WETH 好吗？",
        ];

        for c in cases {
            assert_eq!(IntentClassifier::classify(c), Intent::Action, "{}", c);
        }
    }

    #[test]
    fn test_lookup_then_act() {
        let cases = vec![
            "check the eth price, then deposit 0.001 WETH into Aave",
            "先看看 ETH 行情，然后把 0.001 WETH 存入 Aave",
            "analyze the market and if it looks good, deposit 0.01 weth",
        ];

        for c in cases {
            assert_eq!(IntentClassifier::classify(c), Intent::LookupThenAct, "{}", c);
        }
    }

    #[test]
    fn test_greetings_and_noise() {
        for c in ["hi", "Hello!", "你好", "谢谢！", "", "ok", "帮我理财"] {
            assert_eq!(IntentClassifier::classify(c), Intent::Greeting, "{}", c);
        }
    }

    #[test]
    fn test_imperative_forms() {
        assert!(has_eth_amount("swap 0.5 eth"));
        assert!(has_eth_amount("存入 1weth"));
        assert!(!has_eth_amount("what is aave v3?"));
        assert!(is_imperative("please deposit into aave"));
        assert!(!is_imperative("how does approve work?"));
    }

    #[test]
    fn test_word_boundaries() {
        assert_eq!(find_keyword("authentic", "then"), None);
        assert_eq!(find_keyword("and then go", "then"), Some(4));
        assert_eq!(find_keyword("prices today", "price"), None);
        assert_eq!(find_keyword("prices today", "prices"), Some(0));
    }
}
