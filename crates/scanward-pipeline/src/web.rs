//! Web alert grouping.
//!
//! Web scanners report one alert per (rule, url, param). Reports read better
//! grouped by rule with the hits as instances, most severe first.

use serde_json::{json, Map, Value};

fn risk_priority(risk: &str) -> u8 {
    match risk {
        "High" => 1,
        "Medium" => 2,
        "Low" => 3,
        "Informational" => 4,
        _ => 5,
    }
}

fn field(item: &Value, key: &str) -> Value {
    item.get(key).cloned().unwrap_or_else(|| Value::String(String::new()))
}

/// Group raw alerts by `name`, first-seen order, then stable-sort by risk.
pub fn group_web_alerts(alerts: Vec<Value>) -> Vec<Value> {
    let mut groups: Vec<(String, Value)> = Vec::new();

    for alert in alerts {
        let name = alert
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();

        let instance = json!({
            "url": field(&alert, "url"),
            "param": field(&alert, "param"),
            "method": field(&alert, "method"),
            "evidence": field(&alert, "evidence"),
            "messageId": field(&alert, "messageId"),
            "sourceMessageId": field(&alert, "sourceMessageId"),
        });

        let pos = match groups.iter().position(|(n, _)| *n == name) {
            Some(pos) => pos,
            None => {
                let references: Vec<Value> = alert
                    .get("reference")
                    .and_then(Value::as_str)
                    .map(|r| r.split('\n').map(|s| Value::String(s.to_string())).collect())
                    .unwrap_or_default();
                let group = json!({
                    "name": name,
                    "risk": field(&alert, "risk"),
                    "description": field(&alert, "description"),
                    "solution": field(&alert, "solution"),
                    "references": references,
                    "tags": alert.get("tags").cloned().unwrap_or_else(|| Value::Object(Map::new())),
                    "common": {
                        "pluginId": field(&alert, "pluginId"),
                        "cweid": field(&alert, "cweid"),
                        "wascid": field(&alert, "wascid"),
                        "confidence": field(&alert, "confidence"),
                        "sourceid": field(&alert, "sourceid"),
                        "alertRef": field(&alert, "alertRef"),
                    },
                    "instances": [],
                });
                groups.push((name, group));
                groups.len() - 1
            }
        };

        if let Some(instances) = groups[pos].1.get_mut("instances").and_then(Value::as_array_mut) {
            instances.push(instance);
        }
    }

    let mut grouped: Vec<Value> = groups.into_iter().map(|(_, g)| g).collect();
    grouped.sort_by_key(|g| risk_priority(g.get("risk").and_then(Value::as_str).unwrap_or_default()));
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_name_and_sorts_by_risk() {
        let alerts = vec![
            json!({"name": "Cookie without SameSite", "risk": "Low", "url": "https://a/1"}),
            json!({"name": "SQL Injection", "risk": "High", "url": "https://a/2", "param": "id"}),
            json!({"name": "Cookie without SameSite", "risk": "Low", "url": "https://a/3"}),
            json!({"name": "Odd", "risk": "Weird"}),
            json!({"name": "Server Leaks Version", "risk": "Informational",
                   "reference": "https://x\nhttps://y"}),
        ];
        let grouped = group_web_alerts(alerts);

        let names: Vec<_> = grouped.iter().map(|g| g["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec!["SQL Injection", "Cookie without SameSite", "Server Leaks Version", "Odd"]
        );
        assert_eq!(grouped[1]["instances"].as_array().unwrap().len(), 2);
        assert_eq!(grouped[0]["instances"][0]["param"], "id");
        assert_eq!(grouped[2]["references"], json!(["https://x", "https://y"]));
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(group_web_alerts(Vec::new()).is_empty());
    }
}
