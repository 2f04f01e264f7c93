use probelink_protocol::ExchangeKind;

/// Whether a message published with `routing_key` reaches a binding with `pattern`.
pub fn matches(kind: ExchangeKind, pattern: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => pattern == routing_key,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = pattern.split('.').collect();
            let key: Vec<&str> = routing_key.split('.').collect();
            topic_match(&pattern, &key)
        }
    }
}

// `*` is exactly one word, `#` is zero or more words.
fn topic_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| topic_match(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && topic_match(rest, tail),
            None => false,
        },
    }
}
