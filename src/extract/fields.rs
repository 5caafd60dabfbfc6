use tracing::debug;

use super::srcset::pick_best_from_srcset;
use crate::browser::Page;
use crate::config::{FieldSpec, FieldType, Locator, SELF_SELECTOR};
use crate::error::PageError;
use crate::record::Record;

/// Extract every field from `scope`. A failing field becomes null, except
/// `text_optional` fields which are left out. Never aborts on a single field.
///
/// A `None` scope (root that matched nothing) fails every field.
pub async fn extract_fields<P: Page>(
    page: &P,
    scope: Option<&P::Node>,
    fields: &[FieldSpec],
) -> Record {
    let mut rec = Record::new();
    for field in fields {
        match extract_field(page, scope, field).await {
            Ok(value) => rec.set(&field.name, value),
            Err(e) => {
                debug!("field {} ({:?}) failed: {}", field.name, field.kind, e);
                if field.kind != FieldType::TextOptional {
                    rec.set(&field.name, None);
                }
            }
        }
    }
    rec
}

async fn extract_field<P: Page>(
    page: &P,
    scope: Option<&P::Node>,
    field: &FieldSpec,
) -> Result<Option<String>, PageError> {
    let scope = scope.ok_or_else(|| PageError::NoMatch(field.selector.clone()))?;
    let node = if field.selector == SELF_SELECTOR {
        scope.clone()
    } else {
        page.locate(Some(scope), &Locator::from_selector(&field.selector))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PageError::NoMatch(field.selector.clone()))?
    };

    match field.kind {
        FieldType::Text | FieldType::TextOptional => {
            let text = page.inner_text(&node).await?;
            Ok(Some(text.trim().to_string()))
        }
        FieldType::Attr | FieldType::Image => {
            let name = field
                .attr_name()
                .ok_or(PageError::Unsupported("attr field without an attribute name"))?;
            page.attribute(&node, name).await
        }
        FieldType::Srcset => {
            let name = field.attr_name().unwrap_or("srcset");
            let raw = page.attribute(&node, name).await?;
            Ok(pick_best_from_srcset(raw.as_deref()))
        }
    }
}
