use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    entries: Vec<(String, Value)>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(render_value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut extended = self.clone();
        extended.set(key, value);
        extended
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut out = Assignment::new();
        for (k, v) in iter {
            out.set(k, v);
        }
        out
    }
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_preserves_first_insertion_position() {
        let mut args = Assignment::new();
        args.set("b", json!(1));
        args.set("a", json!(2));
        args.set("b", json!("x"));
        assert_eq!(args.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(args.get("b"), Some(&json!("x")));
    }

    #[test]
    fn render_value_uses_plain_text_for_strings() {
        assert_eq!(render_value(&json!("abc")), "abc");
        assert_eq!(render_value(&json!(3)), "3");
        assert_eq!(render_value(&json!(2.5)), "2.5");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&Value::Null), "");
        assert_eq!(render_value(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn with_does_not_touch_the_original() {
        let args: Assignment = vec![("a", json!(1))].into_iter().collect();
        let extended = args.with("stdout", "42");
        assert!(!args.contains_key("stdout"));
        assert_eq!(extended.text("stdout").as_deref(), Some("42"));
        assert_eq!(extended.len(), 2);
    }
}
