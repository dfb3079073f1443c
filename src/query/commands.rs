use crate::chain::Chain;
use crate::query::formatters::{OutputFormat, format_events, format_stats, format_watermarks};
use crate::repository::{EventFilter, TransferEventRepository};
use anyhow::Result;
use chrono::{DateTime, Utc};

#[derive(Default)]
pub struct EventQuery {
    pub chain: Option<String>,
    pub facilitator: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

fn parse_chain(chain: Option<&str>) -> Result<Option<Chain>> {
    chain
        .map(|c| c.parse::<Chain>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()
}

fn parse_instant(label: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| anyhow::anyhow!("Invalid {label} timestamp (expected RFC 3339): {v}"))
        })
        .transpose()
}

/// Turn CLI arguments into a store filter. Addresses are normalised for
/// the chain when one is given, otherwise matched as typed.
pub fn build_filter(query: &EventQuery) -> Result<EventFilter> {
    let chain = parse_chain(query.chain.as_deref())?;
    let normalize = |addr: &String| match chain {
        Some(chain) => chain.normalize_address(addr),
        None => addr.trim().to_string(),
    };

    Ok(EventFilter {
        chain,
        facilitator_id: query.facilitator.clone(),
        transaction_from: query.from.as_ref().map(normalize),
        recipient: query.to.as_ref().map(normalize),
        since: parse_instant("since", query.since.as_deref())?,
        until: parse_instant("until", query.until.as_deref())?,
    })
}

pub fn cmd_events(
    repo: &TransferEventRepository,
    query: EventQuery,
    format: &OutputFormat,
) -> Result<()> {
    let filter = build_filter(&query)?;
    let events = repo.query_events(&filter, query.limit, query.offset)?;
    println!("{}", format_events(&events, format));
    Ok(())
}

pub fn cmd_stats(
    repo: &TransferEventRepository,
    chain: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let chain = parse_chain(chain)?;
    let stats = repo.facilitator_stats(chain)?;
    println!("{}", format_stats(&stats, format));
    Ok(())
}

pub fn cmd_watermarks(repo: &TransferEventRepository, format: &OutputFormat) -> Result<()> {
    let marks = repo.watermarks()?;
    println!("{}", format_watermarks(&marks, format));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_normalises_evm_addresses() {
        let query = EventQuery {
            chain: Some("base".to_string()),
            from: Some("0xDBDF3D8ED80F84C35D01C6C9F9271761BAD90BA6".to_string()),
            since: Some("2025-06-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let filter = build_filter(&query).unwrap();
        assert_eq!(filter.chain, Some(Chain::Base));
        assert_eq!(
            filter.transaction_from.as_deref(),
            Some("0xdbdf3d8ed80f84c35d01c6c9f9271761bad90ba6")
        );
        assert!(filter.since.is_some());
    }

    #[test]
    fn filter_rejects_bad_input() {
        let bad_chain = EventQuery {
            chain: Some("dogechain".to_string()),
            ..Default::default()
        };
        assert!(build_filter(&bad_chain).is_err());

        let bad_time = EventQuery {
            until: Some("last tuesday".to_string()),
            ..Default::default()
        };
        assert!(build_filter(&bad_time).is_err());
    }
}
