use crate::report::SweepReport;
use crate::store::{SellRecord, StoreStats, TokenCandidate};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;

#[derive(Debug, Clone)]
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

pub fn format_report(report: &SweepReport, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_report_table(report),
        OutputFormat::Json => {
            serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Csv => format_report_csv(report),
    }
}

fn format_report_table(report: &SweepReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Wallet {:#} | source={} | dust_count={}",
        report.wallet, report.source, report.dust_count
    ));
    if let Some(swaps_done) = report.swaps_done {
        out.push_str(&format!(" | swaps_done={}", swaps_done));
    }
    out.push('\n');

    if report.dust.is_empty() {
        out.push_str("No dust found.\n");
    } else {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "Symbol",
                "Contract",
                "Amount",
                "Value (Native)",
                "Value (USD)",
                "Raw Balance",
            ]);

        for item in &report.dust {
            table.add_row(vec![
                Cell::new(&item.symbol),
                Cell::new(format!("{:#}", item.contract)),
                Cell::new(item.amount),
                Cell::new(
                    item.native_value
                        .map_or("N/A".to_string(), |v| format!("{:.6}", v)),
                ),
                Cell::new(
                    item.usd_value
                        .map_or("N/A".to_string(), |v| format!("{:.2}", v)),
                ),
                Cell::new(&item.raw_balance),
            ]);
        }
        out.push_str(&table.to_string());
        out.push('\n');
    }

    for note in &report.notes {
        out.push_str(&format!("note: {}\n", note));
    }

    out
}

fn format_report_csv(report: &SweepReport) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record([
        "symbol",
        "contract",
        "amount",
        "decimals",
        "raw_balance",
        "native_value",
        "usd_value",
    ]);

    for item in &report.dust {
        let _ = wtr.write_record([
            &item.symbol,
            &format!("{:?}", item.contract),
            &item.amount.to_string(),
            &item.decimals.to_string(),
            &item.raw_balance,
            &item
                .native_value
                .map_or("".to_string(), |v| v.to_string()),
            &item.usd_value.map_or("".to_string(), |v| v.to_string()),
        ]);
    }

    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

pub fn format_tokens(tokens: &[TokenCandidate], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_tokens_table(tokens),
        OutputFormat::Json => format_tokens_json(tokens),
        OutputFormat::Csv => format_tokens_csv(tokens),
    }
}

fn format_tokens_table(tokens: &[TokenCandidate]) -> String {
    if tokens.is_empty() {
        return "No tokens found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Address", "First Seen Block"]);

    for (i, token) in tokens.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(format!("{:#}", token.address)),
            Cell::new(token.first_seen_block),
        ]);
    }

    table.to_string()
}

fn format_tokens_json(tokens: &[TokenCandidate]) -> String {
    let json_tokens: Vec<_> = tokens
        .iter()
        .map(|t| {
            json!({
                "address": format!("{:?}", t.address),
                "first_seen_block": t.first_seen_block,
            })
        })
        .collect();

    serde_json::to_string_pretty(&json_tokens).unwrap_or_else(|_| "[]".to_string())
}

fn format_tokens_csv(tokens: &[TokenCandidate]) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record(["address", "first_seen_block"]);

    for token in tokens {
        let _ = wtr.write_record([
            &format!("{:?}", token.address),
            &token.first_seen_block.to_string(),
        ]);
    }

    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

pub fn format_sell_state(records: &[SellRecord], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if records.is_empty() {
                return "No sales recorded.".to_string();
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Token", "Last Sold (Unix)"]);

            for record in records {
                table.add_row(vec![
                    Cell::new(format!("{:#}", record.token)),
                    Cell::new(record.last_sold),
                ]);
            }

            table.to_string()
        }
        OutputFormat::Json => {
            let json_records: Vec<_> = records
                .iter()
                .map(|r| {
                    json!({
                        "token": format!("{:?}", r.token),
                        "last_sold": r.last_sold,
                    })
                })
                .collect();

            serde_json::to_string_pretty(&json_records).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["token", "last_sold"]);

            for record in records {
                let _ = wtr.write_record([
                    &format!("{:?}", record.token),
                    &record.last_sold.to_string(),
                ]);
            }

            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

pub fn format_stats(stats: &StoreStats, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Metric", "Value"]);

            table.add_row(vec![
                Cell::new("Tokens Tracked"),
                Cell::new(stats.tokens_tracked),
            ]);
            table.add_row(vec![
                Cell::new("Scan Checkpoint"),
                Cell::new(stats.checkpoint.map_or("N/A".to_string(), |b| b.to_string())),
            ]);
            table.add_row(vec![
                Cell::new("Sales Recorded"),
                Cell::new(stats.sales_recorded),
            ]);

            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "tokens_tracked": stats.tokens_tracked,
            "checkpoint": stats.checkpoint,
            "sales_recorded": stats.sales_recorded,
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["metric", "value"]);
            let _ = wtr.write_record(["tokens_tracked", &stats.tokens_tracked.to_string()]);
            let _ = wtr.write_record([
                "checkpoint",
                &stats.checkpoint.map_or("N/A".to_string(), |b| b.to_string()),
            ]);
            let _ = wtr.write_record(["sales_recorded", &stats.sales_recorded.to_string()]);
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}
