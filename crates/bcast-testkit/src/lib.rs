// bcast-testkit: shared fakes for the broadcast messaging platform's test
// suite. Mirrors the teacher's `rt-test-utils` crate (mock WS client/server)
// but provides the fakes this domain's tests actually need: a deterministic
// clock and a pre-seeded targeting service, layered on top of the real
// in-memory event bus and connection registry (those already serve as their
// own fakes, so this crate doesn't duplicate them).

pub mod clock;
pub mod fake_targeting;

pub use clock::{Clock, FixedClock, SystemClock};
pub use fake_targeting::FakeTargetingService;

pub use bcast_eventbus::InMemoryEventBus;
pub use bcast_registry::InMemoryConnectionRegistry;

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_registry::ConnectionRegistry;

    #[tokio::test]
    async fn in_memory_fakes_are_usable_directly_from_the_testkit() {
        let registry = InMemoryConnectionRegistry::new(10);
        registry.register("u1", "c1", "pod-a", "cluster-1").await.unwrap();
        assert_eq!(registry.locate("u1").await.unwrap().len(), 1);
    }
}
