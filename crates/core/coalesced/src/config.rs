use serde::Deserialize;

#[derive(Deserialize, Clone, PartialEq, Eq, Debug, Default)]
#[serde(default)]
/// Config values for [`CoalescionService`](crate::CoalescionService).
pub struct CoalescionServiceConfig {
    /// How many distinct operations may be in flight at once, `None` for no limit
    ///
    /// Joining an operation that is already running is never limited.
    pub max_concurrent: Option<usize>,
}
