use crate::policy::Policy;

/// The policy of a cache with no size bound and no expiration.
#[derive(Debug, Clone, Copy)]
pub struct UnboundedPolicy {
  recording_stats: bool,
}

impl UnboundedPolicy {
  pub(crate) fn new(recording_stats: bool) -> Self {
    Self { recording_stats }
  }
}

impl Policy for UnboundedPolicy {
  fn is_recording_stats(&self) -> bool {
    self.recording_stats
  }
}
