//! Audience filtering by purchase history

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::client::{normalize_name, CrmError, Product};
use super::service::CrmService;

/// Decision for one phone number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResult {
    pub phone_number: String,
    pub should_send: bool,
    /// Purchased products that matched the group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_products: Vec<Product>,
    /// Why the customer's orders could not be checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Products of the selected group, indexed for matching
pub struct GroupMatcher {
    ids: HashSet<i64>,
    names: HashSet<String>,
}

impl GroupMatcher {
    pub fn new(group_products: &[Product]) -> Self {
        Self {
            ids: group_products.iter().map(|p| p.id).collect(),
            names: group_products
                .iter()
                .map(|p| normalize_name(&p.name))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// A purchase matches by product id or by trimmed, case-folded name
    pub fn matches(&self, purchased: &Product) -> bool {
        self.ids.contains(&purchased.id) || self.names.contains(&normalize_name(&purchased.name))
    }
}

/// Decide, for each phone, whether the customer bought anything from the
/// group named `group_name`. Results keep the input order.
///
/// Only loading the group is fatal; a failed order lookup yields
/// `should_send = false` for that phone.
pub async fn filter_by_category(
    crm: &CrmService,
    phones: &[String],
    group_name: &str,
    cancel: &CancellationToken,
) -> Result<Vec<FilterResult>, CrmError> {
    let group_products = crm.products_in_group(group_name, cancel).await?;
    let matcher = GroupMatcher::new(&group_products);

    let mut results = Vec::with_capacity(phones.len());
    for phone in phones {
        if cancel.is_cancelled() {
            return Err(CrmError::Cancelled);
        }

        let result = match crm.products_by_phone(phone, cancel).await {
            Ok(purchased) => {
                let matched: Vec<Product> =
                    purchased.into_iter().filter(|p| matcher.matches(p)).collect();
                FilterResult {
                    phone_number: phone.clone(),
                    should_send: !matched.is_empty(),
                    matched_products: matched,
                    error: None,
                }
            }
            Err(CrmError::Cancelled) => return Err(CrmError::Cancelled),
            Err(e) => {
                warn!(recipient = %phone, error = %e, "CRM lookup failed, excluding recipient");
                FilterResult {
                    phone_number: phone.clone(),
                    should_send: false,
                    matched_products: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }

    info!(
        group = %group_name,
        checked = results.len(),
        selected = results.iter().filter(|r| r.should_send).count(),
        "Category filter applied"
    );

    Ok(results)
}
