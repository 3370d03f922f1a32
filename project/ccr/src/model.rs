//! Checkpoint records exchanged over the control RPC.
//!
//! Field names follow the established wire format; unknown fields in
//! requests are ignored and missing fields take their defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Checkpoint {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Sandbox")]
    pub sandbox: String,
    #[serde(rename = "Container")]
    pub container: String,
    /// Monotonically increasing per (sandbox, container).
    #[serde(rename = "Round")]
    pub round: i64,
    #[serde(rename = "Ref")]
    pub reference: String,
    #[serde(rename = "Committed")]
    pub committed: bool,
    #[serde(rename = "Mount")]
    pub mount: CcrMount,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CcrMount {
    #[serde(rename = "Type")]
    pub typ: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Options")]
    pub options: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names_are_stable() {
        let cp = Checkpoint {
            id: "x".into(),
            sandbox: "sb".into(),
            container: "c".into(),
            round: 2,
            reference: "reg/ns:checkpoint-sb-c-v2".into(),
            committed: true,
            mount: CcrMount {
                typ: "rrw".into(),
                source: "meta-x.tar".into(),
                options: vec!["ro".into()],
            },
        };
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["ID"], "x");
        assert_eq!(json["Sandbox"], "sb");
        assert_eq!(json["Round"], 2);
        assert_eq!(json["Ref"], "reg/ns:checkpoint-sb-c-v2");
        assert_eq!(json["Committed"], true);
        assert_eq!(json["Mount"]["Type"], "rrw");
        assert_eq!(json["Mount"]["Options"][0], "ro");
    }

    #[test]
    fn unknown_and_missing_fields_are_tolerated() {
        let cp: Checkpoint =
            serde_json::from_str(r#"{"Sandbox":"sb","Container":"c","Bogus":42}"#).unwrap();
        assert_eq!(cp.sandbox, "sb");
        assert_eq!(cp.container, "c");
        assert_eq!(cp.round, 0);
        assert!(!cp.committed);
        assert_eq!(cp.mount, CcrMount::default());
    }
}
