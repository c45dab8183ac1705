//! Trust and authority validation.
//!
//! A source directory may only contribute data belonging to the organization
//! it is authoritative for. Every pulled resource is checked against the
//! authoritative organization tree before it is allowed into the update
//! transaction.

use fhir_client::models::{
    reference_id, resource_info, HealthcareService, Location, Organization, PractitionerRole,
    Reference,
};
use serde_json::Value;

use crate::coding;
use crate::error::ValidationError;
use crate::tree::OrganizationTree;

#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub allowed_resource_types: Vec<String>,
}

/// Validate the tree roots once per sync, before per-resource validation:
/// an organization claiming authority must carry exactly one URA identifier.
pub fn validate_tree_roots(tree: &OrganizationTree) -> Result<(), ValidationError> {
    for (root, _) in tree.roots() {
        let count = coding::ura_identifiers(&root.identifier).len();
        if count != 1 {
            return Err(ValidationError::RootUraCount {
                id: root.id.clone().unwrap_or_default(),
                count,
            });
        }
    }
    Ok(())
}

/// Validate one pulled resource against the filtered tree.
///
/// `healthcare_services` is the set of HealthcareService resources pulled in
/// the same sync; it backs the Endpoint ownership rule.
pub fn validate(
    resource: &Value,
    rules: &ValidationRules,
    tree: &OrganizationTree,
    healthcare_services: &[Value],
) -> Result<(), ValidationError> {
    let info = resource_info(resource)
        .map_err(|e| ValidationError::InvalidResource(e.to_string()))?;

    if !rules
        .allowed_resource_types
        .iter()
        .any(|allowed| allowed == &info.resource_type)
    {
        return Err(ValidationError::ResourceTypeNotAllowed(info.resource_type));
    }

    let id = info.id.unwrap_or_default();
    match info.resource_type.as_str() {
        "Organization" => validate_organization(resource, &id, tree),
        "HealthcareService" => validate_healthcare_service(resource, &id, tree),
        "Location" => validate_location(resource, &id, tree),
        "PractitionerRole" => validate_practitioner_role(resource, &id, tree),
        "Endpoint" => validate_endpoint(&id, tree, healthcare_services),
        _ => Ok(()),
    }
}

/// An Organization is accepted iff it carries the URA of a tree root, or it
/// carries no URA and its `partOf` chain terminates at an accepted root.
fn validate_organization(
    resource: &Value,
    id: &str,
    tree: &OrganizationTree,
) -> Result<(), ValidationError> {
    let org: Organization = serde_json::from_value(resource.clone())
        .map_err(|e| ValidationError::InvalidResource(e.to_string()))?;

    if let Some(ura) = coding::ura_value(&org.identifier) {
        if tree.has_root_with_ura(ura) {
            return Ok(());
        }
        return Err(ValidationError::OrganizationNotAuthoritative {
            id: id.to_string(),
        });
    }

    let parent_id = org
        .part_of
        .as_ref()
        .and_then(|r| r.reference.as_deref())
        .map(reference_id);
    let linked = match parent_id {
        // The organization itself may be in the tree under the same id;
        // otherwise the chain is walked from its parent.
        Some(parent) => {
            tree.is_accepted_org_id(id) || tree.chain_terminates_at_root(parent)
        }
        None => false,
    };
    if linked {
        Ok(())
    } else {
        Err(ValidationError::OrganizationUnlinked { id: id.to_string() })
    }
}

fn validate_healthcare_service(
    resource: &Value,
    id: &str,
    tree: &OrganizationTree,
) -> Result<(), ValidationError> {
    let service: HealthcareService = serde_json::from_value(resource.clone())
        .map_err(|e| ValidationError::InvalidResource(e.to_string()))?;
    if reference_in_tree(service.provided_by.as_ref(), tree) {
        Ok(())
    } else {
        Err(ValidationError::OrphanHealthcareService { id: id.to_string() })
    }
}

fn validate_location(
    resource: &Value,
    id: &str,
    tree: &OrganizationTree,
) -> Result<(), ValidationError> {
    let location: Location = serde_json::from_value(resource.clone())
        .map_err(|e| ValidationError::InvalidResource(e.to_string()))?;
    if reference_in_tree(location.managing_organization.as_ref(), tree) {
        Ok(())
    } else {
        Err(ValidationError::OrphanLocation { id: id.to_string() })
    }
}

fn validate_practitioner_role(
    resource: &Value,
    id: &str,
    tree: &OrganizationTree,
) -> Result<(), ValidationError> {
    let role: PractitionerRole = serde_json::from_value(resource.clone())
        .map_err(|e| ValidationError::InvalidResource(e.to_string()))?;
    if reference_in_tree(role.organization.as_ref(), tree) {
        Ok(())
    } else {
        Err(ValidationError::OrphanPractitionerRole { id: id.to_string() })
    }
}

/// An Endpoint is accepted iff an accepted Organization or an accepted
/// HealthcareService lists it in its `endpoint` array.
/// `Endpoint.managingOrganization` is optional in FHIR and deliberately not
/// consulted.
fn validate_endpoint(
    id: &str,
    tree: &OrganizationTree,
    healthcare_services: &[Value],
) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::InvalidResource(
            "Endpoint missing id".to_string(),
        ));
    }

    let owned_by_org = tree.accepted_organizations().any(|org| {
        org.endpoint
            .iter()
            .any(|r| r.reference.as_deref().map(reference_id) == Some(id))
    });
    if owned_by_org {
        return Ok(());
    }

    let owned_by_service = healthcare_services.iter().any(|value| {
        let Ok(service) = serde_json::from_value::<HealthcareService>(value.clone()) else {
            return false;
        };
        reference_in_tree(service.provided_by.as_ref(), tree)
            && service
                .endpoint
                .iter()
                .any(|r| r.reference.as_deref().map(reference_id) == Some(id))
    });
    if owned_by_service {
        return Ok(());
    }

    Err(ValidationError::UnownedEndpoint { id: id.to_string() })
}

fn reference_in_tree(reference: Option<&Reference>, tree: &OrganizationTree) -> bool {
    reference
        .and_then(|r| r.reference.as_deref())
        .map(reference_id)
        .is_some_and(|id| tree.is_accepted_org_id(id))
}
