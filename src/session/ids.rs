use uuid::Uuid;

use crate::engine::types::CorrelationId;

/// Mints correlation ids for outbound requests.
///
/// Stateless: every id is a random v4 UUID, so clones can be handed to other
/// tasks without coordination.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdGenerator;

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn next(&self) -> CorrelationId {
        CorrelationId::new(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let ids = RequestIdGenerator::new();
        let seen: HashSet<CorrelationId> = (0..10_000).map(|_| ids.next()).collect();
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_id_shape() {
        let id = RequestIdGenerator::new().next();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_eq!(id.as_str().len(), 36);
    }
}
