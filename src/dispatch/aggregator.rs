//! Turn aggregator: one outward-facing answer per user turn

use crate::models::{current_turn, Message, Role};

/// Answer used when a turn ends without any reply to show.
pub const FALLBACK_ANSWER: &str = "你好！我是你的 DeFi 智能理财顾问 🤖\n\
我可以帮你：\n\
- 查询代币价格、行情新闻，解读本地研报知识库\n\
- 查询钱包余额，把 ETH 兑换为 WETH，授权并存入 Aave\n\
试试问我：\"ETH 现在多少钱？\" 或 \"把 0.001 WETH 存入 Aave\"";

/// Merge the replies of one turn.
///
/// Replies are joined in emission order by a blank line with the identity
/// tags removed; bodies (and any transaction JSON inside them) are untouched.
/// A trailing system notice (routing failure, truncation) is appended.
pub fn aggregate(replies: &[Message], history_after: &[Message]) -> String {
    let notice = current_turn(history_after)
        .last()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str());

    let bodies: Vec<&str> = replies.iter().map(Message::body).collect();

    match (bodies.is_empty(), notice) {
        (false, Some(notice)) => format!("{}\n\n{}", bodies.join("\n\n"), notice),
        (false, None) => bodies.join("\n\n"),
        (true, Some(notice)) => notice.to_string(),
        (true, None) => terminal_answer(history_after),
    }
}

fn terminal_answer(history_after: &[Message]) -> String {
    match current_turn(history_after).last() {
        Some(last) if last.role != Role::User && !last.content.trim().is_empty() => {
            last.body().to_string()
        }
        _ => FALLBACK_ANSWER.to_string(),
    }
}
