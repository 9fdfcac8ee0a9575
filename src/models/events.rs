use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Entity-change notification emitted by the booking platform's command handlers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexEvent {
    UnitCreated { property_id: Uuid, unit_id: Uuid },
    UnitUpdated { property_id: Uuid, unit_id: Uuid },
    PriceChanged { property_id: Uuid, unit_id: Uuid },
    AvailabilityChanged { property_id: Uuid, unit_id: Uuid },
    BookingCreated { property_id: Uuid, unit_id: Uuid, booking_id: Uuid },
    BookingCancelled { property_id: Uuid, unit_id: Uuid, booking_id: Uuid },
    AmenitiesChanged { property_id: Uuid, unit_id: Uuid },
    UnitDeactivated { property_id: Uuid, unit_id: Uuid },
    UnitRemoved { property_id: Uuid, unit_id: Uuid },
    /// Property-level change (approval, rating, location...): every unit is rebuilt
    PropertyUpdated { property_id: Uuid },
    ApprovalChanged { property_id: Uuid },
}

/// What the indexer should do with the units an event touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Reindex,
    Remove,
}

impl IndexEvent {
    pub fn property_id(&self) -> Uuid {
        match self {
            IndexEvent::UnitCreated { property_id, .. }
            | IndexEvent::UnitUpdated { property_id, .. }
            | IndexEvent::PriceChanged { property_id, .. }
            | IndexEvent::AvailabilityChanged { property_id, .. }
            | IndexEvent::BookingCreated { property_id, .. }
            | IndexEvent::BookingCancelled { property_id, .. }
            | IndexEvent::AmenitiesChanged { property_id, .. }
            | IndexEvent::UnitDeactivated { property_id, .. }
            | IndexEvent::UnitRemoved { property_id, .. }
            | IndexEvent::PropertyUpdated { property_id }
            | IndexEvent::ApprovalChanged { property_id } => *property_id,
        }
    }

    /// `None` for property-wide events
    pub fn unit_id(&self) -> Option<Uuid> {
        match self {
            IndexEvent::UnitCreated { unit_id, .. }
            | IndexEvent::UnitUpdated { unit_id, .. }
            | IndexEvent::PriceChanged { unit_id, .. }
            | IndexEvent::AvailabilityChanged { unit_id, .. }
            | IndexEvent::BookingCreated { unit_id, .. }
            | IndexEvent::BookingCancelled { unit_id, .. }
            | IndexEvent::AmenitiesChanged { unit_id, .. }
            | IndexEvent::UnitDeactivated { unit_id, .. }
            | IndexEvent::UnitRemoved { unit_id, .. } => Some(*unit_id),
            IndexEvent::PropertyUpdated { .. } | IndexEvent::ApprovalChanged { .. } => None,
        }
    }

    pub fn action(&self) -> EventAction {
        match self {
            IndexEvent::UnitDeactivated { .. } | IndexEvent::UnitRemoved { .. } => {
                EventAction::Remove
            }
            _ => EventAction::Reindex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = IndexEvent::BookingCreated {
            property_id: Uuid::nil(),
            unit_id: Uuid::nil(),
            booking_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "booking_created");
        assert_eq!(event.to_string(), "booking_created");
    }

    #[test]
    fn test_event_actions() {
        let id = Uuid::new_v4();
        assert_eq!(
            IndexEvent::UnitRemoved { property_id: id, unit_id: id }.action(),
            EventAction::Remove
        );
        assert_eq!(
            IndexEvent::PriceChanged { property_id: id, unit_id: id }.action(),
            EventAction::Reindex
        );
        assert_eq!(IndexEvent::PropertyUpdated { property_id: id }.unit_id(), None);
    }
}
