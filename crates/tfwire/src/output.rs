use std::fmt::Write as _;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tfwire_frame::function::function_name;
use tfwire_ipcon::Identity;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Whether a payload answered a call or arrived as a callback.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Response,
    Callback,
}

#[derive(Serialize)]
struct PayloadOutput<'a> {
    kind: PayloadKind,
    uid: &'a str,
    function_id: u8,
    function: &'static str,
    payload_size: usize,
    payload_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_text: Option<&'a str>,
    timestamp: String,
}

pub fn print_payload(
    kind: PayloadKind,
    uid: &str,
    function_id: u8,
    payload: &[u8],
    format: OutputFormat,
) {
    let text = printable_text(payload);
    match format {
        OutputFormat::Json => {
            let out = PayloadOutput {
                kind,
                uid,
                function_id,
                function: function_name(function_id),
                payload_size: payload.len(),
                payload_hex: to_hex(payload),
                payload_text: text,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["UID", "FUNCTION", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    uid.to_string(),
                    function_id.to_string(),
                    payload.len().to_string(),
                    text.map(str::to_string).unwrap_or_else(|| to_hex(payload)),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{kind:?} uid={uid} function={function_id} size={} payload={}",
                payload.len(),
                to_hex(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_identity(identity: &Identity, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(identity).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["uid".to_string(), identity.uid.clone()])
                .add_row(vec![
                    "connected_uid".to_string(),
                    identity.connected_uid.clone(),
                ])
                .add_row(vec!["position".to_string(), identity.position.to_string()])
                .add_row(vec![
                    "hardware_version".to_string(),
                    dotted(identity.hardware_version),
                ])
                .add_row(vec![
                    "firmware_version".to_string(),
                    dotted(identity.firmware_version),
                ])
                .add_row(vec![
                    "device_identifier".to_string(),
                    identity.device_identifier.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => println!("{identity}"),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Parse a hex string; whitespace and `:` separators are ignored.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {input:?}"));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).map_err(|_| format!("invalid hex in {input:?}"))?;
            u8::from_str_radix(text, 16).map_err(|_| format!("invalid hex byte {text:?}"))
        })
        .collect()
}

fn printable_text(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload)
        .ok()
        .filter(|text| !text.is_empty() && !text.chars().any(char::is_control))
}

fn dotted(v: [u8; 3]) -> String {
    format!("{}.{}.{}", v[0], v[1], v[2])
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
