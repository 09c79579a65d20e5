use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

/// A single value inside a service binding's credential block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialValue {
    Text(String),
    Number(serde_json::Number),
    Other(serde_json::Value),
}

impl fmt::Display for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialValue::Text(s) => f.write_str(s),
            CredentialValue::Number(n) => write!(f, "{n}"),
            CredentialValue::Other(v) => write!(f, "{v}"),
        }
    }
}

impl CredentialValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CredentialValue::Other(serde_json::Value::Null))
    }
}

impl From<&str> for CredentialValue {
    fn from(value: &str) -> Self {
        CredentialValue::Text(value.to_string())
    }
}

impl From<String> for CredentialValue {
    fn from(value: String) -> Self {
        CredentialValue::Text(value)
    }
}

impl From<u16> for CredentialValue {
    fn from(value: u16) -> Self {
        CredentialValue::Number(value.into())
    }
}

/// Credential block of a service binding.
///
/// Keys keep the casing the platform returned; lookups through [`Credentials::get`]
/// compare case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, CredentialValue>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<CredentialValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn raw(&self, key: &str) -> Option<&CredentialValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CredentialValue)> {
        self.0.iter()
    }

    /// Value of the first alias present, rendered as text. Missing keys and
    /// JSON nulls yield `""`.
    pub fn get(&self, aliases: &[&str]) -> String {
        aliases
            .iter()
            .find_map(|alias| {
                self.0
                    .iter()
                    .find(|(k, v)| k.eq_ignore_ascii_case(alias) && !v.is_null())
                    .map(|(_, v)| v.to_string())
            })
            .unwrap_or_default()
    }

    pub fn host(&self) -> String {
        self.get(&["host", "hostname"])
    }

    /// Port number, or `0` when absent or not a valid port.
    pub fn port(&self) -> u16 {
        self.get(&["port"]).trim().parse().unwrap_or(0)
    }

    pub fn uri(&self) -> String {
        self.get(&["uri", "url"])
    }

    pub fn jdbc_uri(&self) -> String {
        self.get(&["jdbcuri", "jdbcurl", "jdbc_uri", "jdbc_url"])
    }

    pub fn username(&self) -> String {
        self.get(&["user", "username"])
    }

    pub fn password(&self) -> String {
        self.get(&["password", "passwd", "pwd"])
    }

    pub fn database(&self) -> String {
        self.get(&["database", "db", "name"])
    }

    pub fn is_tls_enabled(&self) -> bool {
        if parse_bool(&self.get(&["tls", "tls_enabled", "tlsenabled"])) {
            return true;
        }

        [self.uri(), self.jdbc_uri()]
            .iter()
            .any(|uri| uri.to_lowercase().contains("ssl=true"))
    }

    /// Points the credentials at `host:port`.
    ///
    /// Every textual value containing the previous `host:port` pair is rewritten,
    /// including values unrelated to the address that happen to contain it.
    pub fn set_address(&mut self, host: &str, port: u16) {
        let old_addr = format!("{}:{}", self.host(), self.port());
        let new_addr = format!("{host}:{port}");

        for value in self.0.values_mut() {
            if let CredentialValue::Text(s) = value {
                if s.contains(&old_addr) {
                    *s = s.replace(&old_addr, &new_addr);
                }
            }
        }

        let mut host_set = false;
        let mut port_set = false;
        for (key, value) in self.0.iter_mut() {
            if key.eq_ignore_ascii_case("host") || key.eq_ignore_ascii_case("hostname") {
                *value = CredentialValue::Text(host.to_string());
                host_set = true;
            } else if key.eq_ignore_ascii_case("port") {
                *value = match value {
                    CredentialValue::Text(_) => CredentialValue::Text(port.to_string()),
                    _ => CredentialValue::from(port),
                };
                port_set = true;
            }
        }

        if !host_set {
            self.insert("host", host);
        }
        if !port_set {
            self.insert("port", port);
        }
    }

    /// Writes `key: value` lines sorted by key.
    pub fn write_summary<W: Write>(&self, writer: &mut W, indent: &str) -> io::Result<()> {
        for (key, value) in &self.0 {
            writeln!(writer, "{indent}{key}: {value}")?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<CredentialValue>> FromIterator<(K, V)> for Credentials {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "true" | "TRUE" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creds(value: serde_json::Value) -> Credentials {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn get_matches_aliases_case_insensitively_in_priority_order() {
        let c = creds(json!({"HostName": "b.example", "Host": "a.example"}));
        assert_eq!(c.host(), "a.example");

        let c = creds(json!({"HOSTNAME": "b.example"}));
        assert_eq!(c.host(), "b.example");

        assert_eq!(c.username(), "");
    }

    #[test]
    fn port_accepts_numbers_and_strings() {
        assert_eq!(creds(json!({"port": 5432})).port(), 5432);
        assert_eq!(creds(json!({"port": "6543"})).port(), 6543);
        assert_eq!(creds(json!({"port": "nope"})).port(), 0);
        assert_eq!(creds(json!({})).port(), 0);
    }

    #[test]
    fn aliases_for_remaining_fields() {
        let c = creds(json!({
            "url": "postgres://x",
            "jdbc_url": "jdbc:postgresql://x",
            "username": "u",
            "pwd": "p",
            "name": "d",
        }));
        assert_eq!(c.uri(), "postgres://x");
        assert_eq!(c.jdbc_uri(), "jdbc:postgresql://x");
        assert_eq!(c.username(), "u");
        assert_eq!(c.password(), "p");
        assert_eq!(c.database(), "d");
    }

    #[test]
    fn null_values_read_as_missing() {
        let c = creds(json!({"password": null, "pwd": "fallback", "name": null}));
        assert_eq!(c.password(), "fallback");
        assert_eq!(c.database(), "");
        assert_eq!(c.raw("name"), Some(&CredentialValue::Other(json!(null))));
    }

    #[test]
    fn tls_detection() {
        assert!(creds(json!({"tls": "true"})).is_tls_enabled());
        assert!(creds(json!({"tls_enabled": true})).is_tls_enabled());
        assert!(creds(json!({"TLSEnabled": "1"})).is_tls_enabled());
        assert!(creds(json!({"uri": "mysql://h:3306/db?SSL=TRUE"})).is_tls_enabled());
        assert!(creds(json!({"jdbcUri": "jdbc:mysql://h/db?ssl=true"})).is_tls_enabled());
        assert!(!creds(json!({"tls": "yes"})).is_tls_enabled());
        assert!(!creds(json!({"uri": "mysql://h:3306/db"})).is_tls_enabled());
    }

    #[test]
    fn set_address_rewrites_every_occurrence() {
        let mut c = creds(json!({
            "host": "10.9.8.7",
            "hostname": "10.9.8.7",
            "port": "6543",
            "url": "foo://10.9.8.7:6543/blah",
            "unexpected": "string-with-10.9.8.7:6543",
            "db": "d",
        }));
        c.set_address("127.0.0.1", 9933);

        assert_eq!(c.host(), "127.0.0.1");
        assert_eq!(c.get(&["hostname"]), "127.0.0.1");
        assert_eq!(c.port(), 9933);
        assert_eq!(c.raw("port"), Some(&CredentialValue::Text("9933".into())));
        assert_eq!(c.uri(), "foo://127.0.0.1:9933/blah");
        assert_eq!(c.get(&["unexpected"]), "string-with-127.0.0.1:9933");
        assert_eq!(c.database(), "d");
    }

    #[test]
    fn set_address_keeps_numeric_port_and_inserts_missing_host() {
        let mut c = creds(json!({"port": 5432, "tls": false}));
        c.set_address("127.0.0.1", 7080);

        assert_eq!(c.raw("port"), Some(&CredentialValue::Number(7080.into())));
        assert_eq!(c.raw("host"), Some(&CredentialValue::Text("127.0.0.1".into())));
        assert_eq!(
            serde_json::to_value(&c).unwrap(),
            json!({"host": "127.0.0.1", "port": 7080, "tls": false})
        );
    }

    #[test]
    fn write_summary_sorts_keys() {
        let c = creds(json!({"port": 1, "host": "h", "a": "x"}));
        let mut out = Vec::new();
        c.write_summary(&mut out, "  ").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "  a: x\n  host: h\n  port: 1\n");
    }
}
