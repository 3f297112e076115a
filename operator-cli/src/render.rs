//! Plain-text tables for terminal output.

use custody_operator_types::{InviteResp, WithdrawalRequest};
use serde_json::Value;

const REQUEST_HEADERS: [&str; 7] = [
    "ID",
    "USER",
    "CURRENCY",
    "ADDRESS",
    "CREATED",
    "AMOUNT",
    "STATUS",
];

pub fn requests_table(requests: &[WithdrawalRequest]) -> String {
    if requests.is_empty() {
        return "No pending withdrawal requests\n".to_string();
    }
    let rows = requests
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.user.clone(),
                r.currency().to_string(),
                r.address.address.clone(),
                r.created_at.clone(),
                r.amount.to_string(),
                status_text(&r.confirmation_status),
            ]
        })
        .collect::<Vec<_>>();
    table(&REQUEST_HEADERS, &rows)
}

pub fn invites_table(invites: &[InviteResp]) -> String {
    if invites.is_empty() {
        return "No invites\n".to_string();
    }
    let rows = invites
        .iter()
        .map(|i| vec![i.invite.invite.to_string(), i.label.clone()])
        .collect::<Vec<_>>();
    table(&["INVITE", "LABEL"], &rows)
}

fn status_text(status: &Value) -> String {
    match status {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        // e.g. {"Confirmations":[...]}
        Value::Object(map) => map.keys().cloned().collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| {
        let padded = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(headers.to_vec());
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64, status: Value) -> WithdrawalRequest {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "user": "alice",
            "address": { "BTC": "bc1qxyz" },
            "created_at": "2022-06-01 12:00:00",
            "amount": 1500,
            "confirmation_status": status
        }))
        .unwrap()
    }

    #[test]
    fn test_empty_tables() {
        assert_eq!(requests_table(&[]), "No pending withdrawal requests\n");
        assert_eq!(invites_table(&[]), "No invites\n");
    }

    #[test]
    fn test_requests_table_keeps_order() {
        let out = requests_table(&[
            request(7, Value::Null),
            request(3, serde_json::json!({ "Confirmations": [] })),
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].starts_with("7 "));
        assert!(lines[1].contains("bc1qxyz"));
        assert!(lines[1].ends_with("-"));
        assert!(lines[2].starts_with("3 "));
        assert!(lines[2].ends_with("Confirmations"));
    }
}
