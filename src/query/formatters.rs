use crate::provider::amount::format_scaled_amount;
use crate::repository::{FacilitatorStats, SenderWatermark, TransferEvent};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn optional_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or("N/A".to_string(), timestamp)
}

fn csv_output(wtr: Writer<Vec<u8>>) -> String {
    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

pub fn format_events(events: &[TransferEvent], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_events_table(events),
        OutputFormat::Json => format_events_json(events),
        OutputFormat::Csv => format_events_csv(events),
    }
}

fn format_events_table(events: &[TransferEvent]) -> String {
    if events.is_empty() {
        return "No transfer events found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Time",
            "Chain",
            "Facilitator",
            "Sender",
            "Recipient",
            "Amount",
            "Tx Hash",
        ]);

    for event in events {
        table.add_row(vec![
            Cell::new(timestamp(event.block_timestamp)),
            Cell::new(event.chain),
            Cell::new(&event.facilitator_id),
            Cell::new(shorten(&event.sender)),
            Cell::new(shorten(&event.recipient)),
            Cell::new(format_scaled_amount(event.amount, event.decimals)),
            Cell::new(shorten(&event.tx_hash)),
        ]);
    }

    table.to_string()
}

fn format_events_json(events: &[TransferEvent]) -> String {
    let json_events: Vec<_> = events
        .iter()
        .map(|e| {
            json!({
                "block_timestamp": e.block_timestamp.to_rfc3339(),
                "chain": e.chain,
                "provider": e.provider,
                "facilitator_id": e.facilitator_id,
                "token": e.address,
                "transaction_from": e.transaction_from,
                "sender": e.sender,
                "recipient": e.recipient,
                "amount": format_scaled_amount(e.amount, e.decimals),
                "amount_raw": e.amount.to_string(),
                "decimals": e.decimals,
                "tx_hash": e.tx_hash,
                "log_index": e.log_index,
            })
        })
        .collect();

    serde_json::to_string_pretty(&json_events).unwrap_or_else(|_| "[]".to_string())
}

fn format_events_csv(events: &[TransferEvent]) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record([
        "block_timestamp",
        "chain",
        "provider",
        "facilitator_id",
        "token",
        "transaction_from",
        "sender",
        "recipient",
        "amount",
        "amount_raw",
        "tx_hash",
        "log_index",
    ]);

    for e in events {
        let _ = wtr.write_record([
            &e.block_timestamp.to_rfc3339(),
            e.chain.as_str(),
            e.provider.as_str(),
            &e.facilitator_id,
            &e.address,
            &e.transaction_from,
            &e.sender,
            &e.recipient,
            &format_scaled_amount(e.amount, e.decimals),
            &e.amount.to_string(),
            &e.tx_hash,
            &e.log_index.to_string(),
        ]);
    }

    csv_output(wtr)
}

pub fn format_stats(stats: &[FacilitatorStats], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if stats.is_empty() {
                return "No transfer events stored.".to_string();
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    "Facilitator",
                    "Chain",
                    "Token",
                    "Transfers",
                    "Volume",
                    "First Seen",
                    "Last Seen",
                ]);
            for s in stats {
                table.add_row(vec![
                    Cell::new(&s.facilitator_id),
                    Cell::new(s.chain),
                    Cell::new(shorten(&s.token)),
                    Cell::new(s.transfers),
                    Cell::new(format_scaled_amount(s.volume, s.decimals)),
                    Cell::new(optional_timestamp(s.first_seen)),
                    Cell::new(optional_timestamp(s.last_seen)),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            let rows: Vec<_> = stats
                .iter()
                .map(|s| {
                    json!({
                        "facilitator_id": s.facilitator_id,
                        "chain": s.chain,
                        "token": s.token,
                        "transfers": s.transfers,
                        "volume": format_scaled_amount(s.volume, s.decimals),
                        "volume_raw": s.volume.to_string(),
                        "first_seen": s.first_seen.map(|t| t.to_rfc3339()),
                        "last_seen": s.last_seen.map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record([
                "facilitator_id",
                "chain",
                "token",
                "transfers",
                "volume",
                "volume_raw",
                "first_seen",
                "last_seen",
            ]);
            for s in stats {
                let _ = wtr.write_record([
                    &s.facilitator_id,
                    s.chain.as_str(),
                    &s.token,
                    &s.transfers.to_string(),
                    &format_scaled_amount(s.volume, s.decimals),
                    &s.volume.to_string(),
                    &optional_timestamp(s.first_seen),
                    &optional_timestamp(s.last_seen),
                ]);
            }
            csv_output(wtr)
        }
    }
}

pub fn format_watermarks(marks: &[SenderWatermark], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if marks.is_empty() {
                return "No watermarks yet; every address starts from its sync_start_date.".to_string();
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Chain", "Provider", "Sender", "Transfers", "Latest Event"]);
            for m in marks {
                table.add_row(vec![
                    Cell::new(m.chain),
                    Cell::new(m.provider),
                    Cell::new(&m.transaction_from),
                    Cell::new(m.transfers),
                    Cell::new(timestamp(m.latest)),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            let rows: Vec<_> = marks
                .iter()
                .map(|m| {
                    json!({
                        "chain": m.chain,
                        "provider": m.provider,
                        "transaction_from": m.transaction_from,
                        "transfers": m.transfers,
                        "latest": m.latest.to_rfc3339(),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["chain", "provider", "transaction_from", "transfers", "latest"]);
            for m in marks {
                let _ = wtr.write_record([
                    m.chain.as_str(),
                    m.provider.as_str(),
                    &m.transaction_from,
                    &m.transfers.to_string(),
                    &m.latest.to_rfc3339(),
                ]);
            }
            csv_output(wtr)
        }
    }
}

fn shorten(value: &str) -> String {
    if value.len() <= 14 || !value.is_ascii() {
        return value.to_string();
    }
    format!("{}...{}", &value[..8], &value[value.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::provider::Provider;
    use alloy_primitives::U256;

    fn sample() -> TransferEvent {
        TransferEvent {
            address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
            transaction_from: "0xdbdf3d8ed80f84c35d01c6c9f9271761bad90ba6".to_string(),
            sender: "0x1111111111111111111111111111111111111111".to_string(),
            recipient: "0x2222222222222222222222222222222222222222".to_string(),
            amount: U256::from(12_345_678u64),
            block_timestamp: "2025-06-01T12:00:00Z".parse().unwrap(),
            tx_hash: "0xabcdef0123456789".to_string(),
            chain: Chain::Base,
            provider: Provider::Cdp,
            decimals: 6,
            facilitator_id: "coinbase".to_string(),
            log_index: 4,
        }
    }

    #[test]
    fn output_format_defaults_to_table() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("csv"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Table);
    }

    #[test]
    fn json_events_carry_scaled_and_raw_amounts() {
        let out = format_events(&[sample()], &OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["amount"], "12.345678");
        assert_eq!(parsed[0]["amount_raw"], "12345678");
        assert_eq!(parsed[0]["chain"], "base");
        assert_eq!(parsed[0]["provider"], "cdp");
    }

    #[test]
    fn csv_events_have_header_and_row() {
        let out = format_events(&[sample()], &OutputFormat::Csv);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("block_timestamp,chain"));
        assert!(lines[1].contains("12.345678"));
    }

    #[test]
    fn empty_table_message() {
        assert_eq!(format_events(&[], &OutputFormat::Table), "No transfer events found.");
    }

    #[test]
    fn shortens_long_hashes() {
        assert_eq!(shorten("0xabcdef0123456789"), "0xabcdef...6789");
        assert_eq!(shorten("short"), "short");
    }
}
