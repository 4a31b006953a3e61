/// Classification for retry policy.
///
/// Used by the retry policy to decide whether another attempt against the
/// same provider is worthwhile.
///
/// # Behavior Summary
///
/// | Class | Retry same provider? | Breaker weight |
/// |-------|---------------------|----------------|
/// | `WithBackoff` | Yes, after the backoff delay | 1 |
/// | `AbortProvider` | No, move to the next provider | 2 |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Transient failure - timeout, connection problem, or a malformed payload.
    /// Retried against the same provider until attempts run out.
    WithBackoff,

    /// The provider is throttling us. No further attempts in this pass.
    AbortProvider,
}
