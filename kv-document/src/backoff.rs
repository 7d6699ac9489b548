use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::Error;

/// Factory for [`Backoff`] instances. A fresh instance is started for every
/// top-level batch call, so state never leaks from one call into another.
pub trait BackoffStrategy: Send + Sync {
    fn start(&self) -> Box<dyn Backoff>;
}

/// Delay between retry rounds of unprocessed batch items. Invoked once per round.
pub trait Backoff: Send {
    fn next_delay(&mut self) -> Duration;

    fn wait(&mut self) -> BoxFuture<'static, ()> {
        let delay = self.next_delay();
        Box::pin(tokio::time::sleep(delay))
    }
}

#[derive(Clone, Debug)]
pub struct Constant(pub Duration);

impl BackoffStrategy for Constant {
    fn start(&self) -> Box<dyn Backoff> {
        Box::new(self.clone())
    }
}

impl Backoff for Constant {
    fn next_delay(&mut self) -> Duration {
        self.0
    }
}

/// `base * 2^round`, with the exponent capped at `ceiling`.
#[derive(Clone, Debug)]
pub struct Exponential {
    pub base: Duration,
    pub ceiling: u32,
}

struct ExponentialState {
    base: Duration,
    ceiling: u32,
    round: u32,
}

impl BackoffStrategy for Exponential {
    fn start(&self) -> Box<dyn Backoff> {
        Box::new(ExponentialState {
            base: self.base,
            ceiling: self.ceiling,
            round: 0,
        })
    }
}

impl Backoff for ExponentialState {
    fn next_delay(&mut self) -> Duration {
        let delay = self.base * 2u32.pow(self.round.min(self.ceiling));
        self.round += 1;
        delay
    }
}

#[derive(Clone)]
pub struct BackoffRegistry {
    strategies: HashMap<String, Arc<dyn BackoffStrategy>>,
}

impl Default for BackoffRegistry {
    fn default() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register("constant", Arc::new(Constant(Duration::from_secs(1))));
        registry.register(
            "exponential",
            Arc::new(Exponential {
                base: Duration::from_millis(500),
                ceiling: 3,
            }),
        );
        registry
    }
}

impl BackoffRegistry {
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn BackoffStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn BackoffStrategy>, Error> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownBackoff(name.to_string()))
    }

    /// Start the configured strategy, if any.
    pub(crate) fn start(&self, name: Option<&str>) -> Result<Option<Box<dyn Backoff>>, Error> {
        name.map(|name| self.get(name).map(|strategy| strategy.start()))
            .transpose()
    }
}
