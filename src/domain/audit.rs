use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub actor: String,
    pub detail: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        actor: &str,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_type: entity_type.to_string(),
            entity_id,
            action: action.to_string(),
            actor: actor.to_string(),
            detail,
        }
    }
}
