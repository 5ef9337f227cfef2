//! An example extension.
//!
//! Writes a line to its data log for every external call and vetoes calls whose target is listed
//! in the `CALL_LOGGER_BLOCKED` environment variable (comma separated addresses).

use std::collections::HashSet;

use alloy_primitives::Address;
use evm_plugin::{EventRecord, HandlerReply};
use once_cell::sync::Lazy;

static BLOCKED: Lazy<HashSet<Address>> = Lazy::new(|| {
    std::env::var("CALL_LOGGER_BLOCKED")
        .map(|list| parse_blocked(&list))
        .unwrap_or_default()
});

fn parse_blocked(list: &str) -> HashSet<Address> {
    list.split(',').filter_map(|item| item.trim().parse().ok()).collect()
}

fn on_block(record: &EventRecord) -> HandlerReply {
    let Some(block) = record.body.as_block() else { return HandlerReply::proceed() };
    HandlerReply::proceed().with_message(format!("block {} by {}", block.number, block.coinbase))
}

fn on_call_start(record: &EventRecord) -> HandlerReply {
    let Some(start) = record.body.as_external_start() else { return HandlerReply::proceed() };
    let target = start.to.map_or_else(|| "<create>".to_string(), |to| to.to_string());
    let line = format!("{} -> {target} layer {} value {}", start.from, start.call_layer, start.value);

    match start.to {
        Some(to) if BLOCKED.contains(&to) => {
            HandlerReply::rollback().with_message(format!("{line} vetoed"))
        }
        _ => HandlerReply::proceed().with_message(line),
    }
}

fn on_call_end(record: &EventRecord) -> HandlerReply {
    let Some(end) = record.body.as_external_end() else { return HandlerReply::proceed() };
    let status = if end.is_success { "ok" } else { "failed" };
    HandlerReply::proceed().with_message(format!("layer {} {status}", end.call_layer))
}

fn on_tx_end(record: &EventRecord) -> HandlerReply {
    let Some(summary) = record.body.as_tx_end() else { return HandlerReply::proceed() };
    HandlerReply::proceed().with_message(format!(
        "tx {} touched {} contract(s), {} rollback(s)",
        summary.tx_hash,
        summary.contracts_touched.len(),
        summary.rollbacks
    ))
}

evm_plugin::export_plugin! {
    name: "call-logger",
    handlers: {
        "handle_BLOCK_INFO" => CallLoggerOnBlock => on_block,
        "EXTERNALINFOSTART" => CallLoggerOnCallStart => on_call_start,
        "EXTERNALINFOEND" => CallLoggerOnCallEnd => on_call_end,
        "TXEND" => CallLoggerOnTxEnd => on_tx_end,
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;

    #[test]
    fn test_parse_blocked_skips_garbage() {
        let blocked = parse_blocked("0x00000000000000000000000000000000000000c2, nope,");
        assert_eq!(blocked.len(), 1);
        assert!(blocked.contains(&address!("0x00000000000000000000000000000000000000c2")));
    }

    #[test]
    fn test_descriptor_lists_all_handlers() {
        let descriptor =
            evm_plugin::ExtensionDescriptor::decode(unsafe { Register().as_bytes() }).unwrap();
        assert_eq!(descriptor.name, "call-logger");
        assert_eq!(descriptor.handler_symbol("TXEND"), Some("CallLoggerOnTxEnd"));
        assert_eq!(descriptor.handler_symbol("TXSTART"), None);
    }
}
