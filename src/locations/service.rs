use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::credits::ledger_service::open_account;
use crate::database::models::{Location, LocationAssignment, LocationResource};
use crate::error::{CoreError, CoreResult};
use crate::hierarchy::service::fetch_organization;
use crate::types::{AssignmentEntityType, AssignmentType, CreditEntityType};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    pub name: String,
    pub address: Option<String>,
    pub location_type: Option<String>,
    pub max_occupancy: Option<i32>,
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    #[serde(default = "default_assignment_type")]
    pub assignment_type: AssignmentType,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub credit_sharing_enabled: bool,
    #[serde(default)]
    pub credit_sharing_percentage: Decimal,
}

fn default_assignment_type() -> AssignmentType {
    AssignmentType::Secondary
}

impl Default for AssignmentRequest {
    fn default() -> Self {
        Self {
            assignment_type: default_assignment_type(),
            priority: 0,
            credit_sharing_enabled: false,
            credit_sharing_percentage: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInput {
    pub resource_type: String,
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityUpdate {
    pub max_occupancy: Option<i32>,
    pub current_occupancy: i32,
    #[serde(default)]
    pub resources: Vec<ResourceInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCapacity {
    pub location: Location,
    pub resources: Vec<LocationResource>,
}

impl CapacityUpdate {
    pub fn validate(&self) -> CoreResult<()> {
        if self.current_occupancy < 0 {
            return Err(CoreError::Validation("currentOccupancy cannot be negative".to_string()));
        }
        if let Some(max) = self.max_occupancy {
            if max < 0 {
                return Err(CoreError::Validation("maxOccupancy cannot be negative".to_string()));
            }
            if self.current_occupancy > max {
                return Err(CoreError::Validation(format!(
                    "currentOccupancy {} exceeds maxOccupancy {}",
                    self.current_occupancy, max
                )));
            }
        }
        for resource in &self.resources {
            if resource.resource_type.trim().is_empty() || resource.name.trim().is_empty() {
                return Err(CoreError::Validation("resources need a type and a name".to_string()));
            }
            if resource.quantity < 0 {
                return Err(CoreError::Validation(format!("quantity of {} cannot be negative", resource.name)));
            }
        }
        Ok(())
    }
}

impl AssignmentRequest {
    pub fn validate(&self) -> CoreResult<()> {
        let pct = self.credit_sharing_percentage;
        if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
            return Err(CoreError::Validation(format!(
                "creditSharingPercentage must be between 0 and 100, got {}",
                pct
            )));
        }
        Ok(())
    }
}

/// Physical sites, their assignments to organizations and their capacity
#[derive(Clone)]
pub struct LocationService {
    pool: PgPool,
}

impl LocationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a location with its credit account. When an organization is
    /// given the location starts with a primary assignment to it.
    pub async fn create_location(&self, tenant_id: Uuid, input: NewLocation) -> CoreResult<Location> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("location name is required".to_string()));
        }
        if input.max_occupancy.map_or(false, |max| max < 0) {
            return Err(CoreError::Validation("maxOccupancy cannot be negative".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let location = sqlx::query_as::<_, Location>(
            r#"
            INSERT INTO locations (location_id, tenant_id, name, address, location_type, max_occupancy)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .bind(&input.address)
        .bind(input.location_type.as_deref().unwrap_or("office"))
        .bind(input.max_occupancy)
        .fetch_one(&mut *tx)
        .await?;

        open_account(&mut tx, tenant_id, CreditEntityType::Location, location.location_id, None).await?;

        if let Some(organization_id) = input.organization_id {
            let request = AssignmentRequest {
                assignment_type: AssignmentType::Primary,
                ..AssignmentRequest::default()
            };
            insert_assignment(&mut tx, &location, organization_id, &request).await?;
        }

        tx.commit().await?;

        info!(tenant_id = %tenant_id, location_id = %location.location_id, "Created location");
        Ok(location)
    }

    pub async fn assign_location(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        organization_id: Uuid,
        request: AssignmentRequest,
    ) -> CoreResult<LocationAssignment> {
        request.validate()?;

        let mut tx = self.pool.begin().await?;
        let location = owned_location(&mut tx, tenant_id, location_id).await?;
        let assignment = insert_assignment(&mut tx, &location, organization_id, &request).await?;
        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            location_id = %location_id,
            organization_id = %organization_id,
            assignment_type = %assignment.assignment_type,
            "Assigned location"
        );
        Ok(assignment)
    }

    /// Record occupancy, replace the resource list and append a usage sample
    pub async fn update_capacity(&self, tenant_id: Uuid, location_id: Uuid, update: CapacityUpdate) -> CoreResult<LocationCapacity> {
        update.validate()?;

        let mut tx = self.pool.begin().await?;
        owned_location(&mut tx, tenant_id, location_id).await?;

        let location = sqlx::query_as::<_, Location>(
            r#"
            UPDATE locations
            SET max_occupancy = COALESCE($2, max_occupancy),
                current_occupancy = $3,
                updated_at = NOW()
            WHERE location_id = $1
            RETURNING *
            "#,
        )
        .bind(location_id)
        .bind(update.max_occupancy)
        .bind(update.current_occupancy)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(max) = location.max_occupancy {
            if location.current_occupancy > max {
                return Err(CoreError::Validation(format!(
                    "currentOccupancy {} exceeds maxOccupancy {}",
                    location.current_occupancy, max
                )));
            }
        }

        sqlx::query("DELETE FROM location_resources WHERE location_id = $1")
            .bind(location_id)
            .execute(&mut *tx)
            .await?;

        let mut resources = Vec::with_capacity(update.resources.len());
        for resource in &update.resources {
            let row = sqlx::query_as::<_, LocationResource>(
                r#"
                INSERT INTO location_resources (resource_id, location_id, resource_type, name, quantity)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(location_id)
            .bind(resource.resource_type.trim())
            .bind(resource.name.trim())
            .bind(resource.quantity)
            .fetch_one(&mut *tx)
            .await?;
            resources.push(row);
        }

        sqlx::query("INSERT INTO location_usage (usage_id, location_id, occupancy) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(location_id)
            .bind(location.current_occupancy)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(LocationCapacity { location, resources })
    }

    pub async fn list_assignments(&self, tenant_id: Uuid, location_id: Uuid) -> CoreResult<Vec<LocationAssignment>> {
        let mut conn = self.pool.acquire().await?;
        owned_location(&mut conn, tenant_id, location_id).await?;
        let rows = sqlx::query_as::<_, LocationAssignment>(
            r#"
            SELECT * FROM location_assignments
            WHERE location_id = $1 AND is_active
            ORDER BY priority DESC, created_at
            "#,
        )
        .bind(location_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn get_location(&self, tenant_id: Uuid, location_id: Uuid) -> CoreResult<Location> {
        let mut conn = self.pool.acquire().await?;
        owned_location(&mut conn, tenant_id, location_id).await
    }

    /// Active locations of a tenant, by name
    pub async fn list(&self, tenant_id: Uuid) -> CoreResult<Vec<Location>> {
        let rows = sqlx::query_as::<_, Location>(
            "SELECT * FROM locations WHERE tenant_id = $1 AND is_active ORDER BY name, location_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn owned_location(conn: &mut PgConnection, tenant_id: Uuid, location_id: Uuid) -> CoreResult<Location> {
    let location = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE location_id = $1")
        .bind(location_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CoreError::not_found("location", location_id))?;
    if location.tenant_id != tenant_id {
        return Err(CoreError::TenantMismatch);
    }
    Ok(location)
}

async fn insert_assignment(
    conn: &mut PgConnection,
    location: &Location,
    organization_id: Uuid,
    request: &AssignmentRequest,
) -> CoreResult<LocationAssignment> {
    let organization = fetch_organization(conn, organization_id)
        .await?
        .ok_or_else(|| CoreError::not_found("organization", organization_id))?;
    if organization.tenant_id != location.tenant_id {
        return Err(CoreError::TenantMismatch);
    }
    if !organization.is_active {
        return Err(CoreError::Validation(format!("organization {} is inactive", organization_id)));
    }

    sqlx::query_as::<_, LocationAssignment>(
        r#"
        INSERT INTO location_assignments (
            assignment_id, location_id, tenant_id, entity_type, entity_id, assignment_type,
            priority, credit_sharing_enabled, credit_sharing_percentage
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(location.location_id)
    .bind(location.tenant_id)
    .bind(AssignmentEntityType::Organization)
    .bind(organization_id)
    .bind(request.assignment_type)
    .bind(request.priority)
    .bind(request.credit_sharing_enabled)
    .bind(request.credit_sharing_percentage)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        CoreError::on_unique_violation(
            e,
            format!(
                "location {} already has an active primary assignment to organization {}",
                location.location_id, organization_id
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupancy_cannot_exceed_maximum() {
        let update = CapacityUpdate {
            max_occupancy: Some(10),
            current_occupancy: 11,
            resources: vec![],
        };
        assert!(matches!(update.validate(), Err(CoreError::Validation(_))));

        let update = CapacityUpdate {
            max_occupancy: Some(10),
            current_occupancy: 10,
            resources: vec![],
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn occupancy_without_maximum_is_unbounded() {
        let update = CapacityUpdate {
            max_occupancy: None,
            current_occupancy: 500,
            resources: vec![ResourceInput {
                resource_type: "desk".to_string(),
                name: "Hot desk".to_string(),
                quantity: 40,
            }],
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn unnamed_resources_are_rejected() {
        let update = CapacityUpdate {
            max_occupancy: None,
            current_occupancy: 0,
            resources: vec![ResourceInput {
                resource_type: "room".to_string(),
                name: "  ".to_string(),
                quantity: 1,
            }],
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn sharing_percentage_is_bounded() {
        let mut request = AssignmentRequest::default();
        assert_eq!(request.assignment_type, AssignmentType::Secondary);

        request.credit_sharing_percentage = Decimal::ONE_HUNDRED;
        assert!(request.validate().is_ok());
        request.credit_sharing_percentage = Decimal::new(10001, 2);
        assert!(request.validate().is_err());
        request.credit_sharing_percentage = Decimal::NEGATIVE_ONE;
        assert!(request.validate().is_err());
    }

    #[test]
    fn assignment_body_defaults() {
        let request: AssignmentRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.assignment_type, AssignmentType::Secondary);
        assert_eq!(request.credit_sharing_percentage, Decimal::ZERO);

        let request: AssignmentRequest =
            serde_json::from_str(r#"{"assignmentType":"primary","creditSharingPercentage":"25.5"}"#).unwrap();
        assert_eq!(request.assignment_type, AssignmentType::Primary);
        assert_eq!(request.credit_sharing_percentage, Decimal::new(255, 1));
    }
}
