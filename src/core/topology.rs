use crate::core::error::EngineError;
use probelink_protocol::{ExchangeDeclare, ExchangeKind, Method, QueueBind, QueueDeclare};

/// Exchange, queue and bindings one instance declares on every fresh channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    plugin: String,
    exchange: String,
    kind: ExchangeKind,
    queue: String,
    patterns: Vec<String>,
    routing_key: Option<String>,
}

fn check_segment(what: &str, value: &str) -> Result<(), EngineError> {
    if value.is_empty() {
        return Err(EngineError::InvalidTopology(format!("{} must not be empty", what)));
    }
    if value
        .chars()
        .any(|c| c == '.' || c == '*' || c == '#' || c.is_whitespace())
    {
        return Err(EngineError::InvalidTopology(format!(
            "{} {:?} may not contain '.', '*', '#' or whitespace",
            what, value
        )));
    }
    Ok(())
}

impl Topology {
    /// Exchange `<plugin>`, queue and binding `<plugin>.<app>`, publishes with
    /// routing key `<plugin>.<app>`.
    pub fn for_publisher(plugin: &str, app: &str) -> Result<Self, EngineError> {
        check_segment("plugin", plugin)?;
        check_segment("app", app)?;
        let key = format!("{}.{}", plugin, app);
        Ok(Topology {
            plugin: plugin.to_string(),
            exchange: plugin.to_string(),
            kind: ExchangeKind::Topic,
            queue: key.clone(),
            patterns: vec![key.clone()],
            routing_key: Some(key),
        })
    }

    /// Exchange `<plugin>`, queue and binding `<plugin>.*`.
    pub fn for_subscriber(plugin: &str) -> Result<Self, EngineError> {
        check_segment("plugin", plugin)?;
        let pattern = format!("{}.*", plugin);
        Ok(Topology {
            plugin: plugin.to_string(),
            exchange: plugin.to_string(),
            kind: ExchangeKind::Topic,
            queue: pattern.clone(),
            patterns: vec![pattern],
            routing_key: None,
        })
    }

    /// Adds a `<plugin>.<app>` binding. Duplicates are ignored.
    pub fn with_app(mut self, app: &str) -> Result<Self, EngineError> {
        check_segment("app", app)?;
        let pattern = format!("{}.{}", self.plugin, app);
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        Ok(self)
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn binding_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn declare_exchange(&self) -> Method {
        Method::ExchangeDeclare(ExchangeDeclare {
            exchange: self.exchange.clone(),
            kind: self.kind,
        })
    }

    pub fn declare_queue(&self) -> Method {
        Method::QueueDeclare(QueueDeclare {
            queue: self.queue.clone(),
        })
    }

    pub fn bind(&self, index: usize) -> Option<Method> {
        self.patterns.get(index).map(|pattern| {
            Method::QueueBind(QueueBind {
                queue: self.queue.clone(),
                exchange: self.exchange.clone(),
                routing_key: pattern.clone(),
            })
        })
    }
}
