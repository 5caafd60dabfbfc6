pub mod fields;
pub mod srcset;

use tracing::{debug, warn};

use crate::browser::{Page, Profile};
use crate::config::{Locator, SectionConfig};
use crate::record::Record;

pub use fields::extract_fields;

/// Container tag a text-located root is widened to.
const SECTION_TAG: &str = "section";

/// Extract one configured section from the current page.
///
/// A list section yields one record per item (in document order, tagged `_idx`);
/// otherwise exactly one record is taken from the root. A section without an
/// `input` locator is unresolvable and yields nothing. A root that matches
/// nothing yields no list items, and a singleton record with every field failed.
pub async fn extract_section<P: Page>(
    page: &P,
    section: &SectionConfig,
    site_key: &str,
    profile: Profile,
) -> Vec<Record> {
    let Some(locator) = section.input.as_ref() else {
        warn!("[{}/{}] section {} has no input locator", site_key, profile, section.name);
        return Vec::new();
    };
    let root = locate_root(page, locator).await;
    if root.is_none() {
        warn!(
            "[{}/{}] root {:?} of section {} matched nothing",
            site_key, profile, locator, section.name
        );
    }

    match &section.list {
        Some(list) if !list.item_selector.trim().is_empty() => {
            let Some(root) = root else {
                return Vec::new();
            };
            let items = match page
                .locate(Some(&root), &Locator::from_selector(&list.item_selector))
                .await
            {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        "[{}/{}] items `{}` of section {} failed: {}",
                        site_key, profile, list.item_selector, section.name, e
                    );
                    return Vec::new();
                }
            };
            let mut records = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let mut rec = extract_fields(page, Some(item), &list.fields).await;
                rec.tag(&section.name, profile, Some(idx));
                records.push(rec);
            }
            debug!("[{}/{}] {}: {} items", site_key, profile, section.name, records.len());
            records
        }
        _ => {
            let mut rec = extract_fields(page, root.as_ref(), &section.fields).await;
            rec.tag(&section.name, profile, None);
            vec![rec]
        }
    }
}

/// Resolve the section root: the first match in document order. Text locators
/// widen the hit to its nearest enclosing `<section>`, or keep the hit itself
/// when there is none. A locator error counts as no match.
async fn locate_root<P: Page>(page: &P, locator: &Locator) -> Option<P::Node> {
    let first = match page.locate(None, locator).await {
        Ok(nodes) => nodes.into_iter().next()?,
        Err(e) => {
            debug!("root locator {:?} failed: {}", locator, e);
            return None;
        }
    };
    match locator {
        Locator::Text(_) => match page.ancestor_or_self(&first, SECTION_TAG).await {
            Ok(Some(container)) => Some(container),
            Ok(None) => Some(first),
            Err(e) => {
                debug!("ancestor lookup failed: {}", e);
                Some(first)
            }
        },
        _ => Some(first),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::HtmlPage;
    use crate::config::{FieldSpec, FieldType, ListSpec, Validation, SELF_SELECTOR};
    use serde_json::{json, Value};

    fn page() -> HtmlPage {
        let html = std::fs::read_to_string("tests/fixtures/landing.html").unwrap();
        HtmlPage::from_html(&html)
    }

    fn field(name: &str, kind: FieldType, selector: &str, attr: Option<&str>) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            kind,
            selector: selector.into(),
            attr: attr.map(String::from),
        }
    }

    fn single(name: &str, input: Option<Locator>, fields: Vec<FieldSpec>) -> SectionConfig {
        SectionConfig {
            name: name.into(),
            input,
            list: None,
            fields,
            validation: Validation::default(),
        }
    }

    fn listed(name: &str, input: Locator, item: &str, fields: Vec<FieldSpec>) -> SectionConfig {
        SectionConfig {
            name: name.into(),
            input: Some(input),
            list: Some(ListSpec {
                item_selector: item.into(),
                fields,
            }),
            fields: Vec::new(),
            validation: Validation::default(),
        }
    }

    #[tokio::test]
    async fn singleton_section_has_no_index() {
        let section = single(
            "hero",
            Some(Locator::Css("#hero".into())),
            vec![
                field("title", FieldType::Text, "h1", None),
                field("cta", FieldType::Attr, "a.cta", Some("href")),
                field("banner_image", FieldType::Srcset, "img.banner", None),
                field("subtitle", FieldType::Text, "h4", None),
                field("note", FieldType::TextOptional, "p.note", None),
            ],
        );
        let records = extract_section(&page(), &section, "shop", Profile::Desktop).await;
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.get("title"), Some(&json!("Wielka wyprzedaż")));
        assert_eq!(r.get("cta"), Some(&json!("/promocje")));
        assert_eq!(r.get("banner_image"), Some(&json!("/img/hero-large.jpg")));
        assert_eq!(r.get("subtitle"), Some(&Value::Null));
        assert!(!r.contains("note"));
        assert_eq!(r.section(), Some("hero"));
        assert_eq!(r.get("_profile"), Some(&json!("desktop")));
        assert!(!r.contains("_idx"));
    }

    #[tokio::test]
    async fn list_section_enumerates_in_order() {
        let section = listed(
            "promos",
            Locator::Css("#promos".into()),
            "li.tile",
            vec![
                field("name", FieldType::Text, "h3", None),
                field("link", FieldType::Attr, "a", Some("href")),
                field("image", FieldType::Image, "img", None),
                field("hires_image", FieldType::Srcset, "img", None),
                field("badge", FieldType::TextOptional, ".badge", None),
            ],
        );
        let records = extract_section(&page(), &section, "shop", Profile::Mobile).await;
        assert_eq!(records.len(), 3);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.index(), Some(i as u64));
            assert_eq!(r.get("_profile"), Some(&json!("mobile")));
        }
        assert_eq!(records[0].get("name"), Some(&json!("Krem do rąk")));
        assert_eq!(records[1].get("link"), Some(&json!("/p/2")));
        assert_eq!(records[0].get("hires_image"), Some(&json!("/img/p1@2x.jpg")));
        assert_eq!(records[0].get("badge"), Some(&json!("-20%")));
        assert!(!records[1].contains("badge"));
        // Third tile: no src attribute and an empty srcset.
        assert_eq!(records[2].get("image"), Some(&Value::Null));
        assert_eq!(records[2].get("hires_image"), Some(&Value::Null));
        assert_eq!(records[2].get("name"), Some(&json!("Pasta do zębów")));
    }

    #[tokio::test]
    async fn text_root_widens_to_section() {
        let section = listed(
            "news",
            Locator::Text("Nowości tygodnia".into()),
            "article.card",
            vec![
                field("image", FieldType::Image, "img", None),
                field("label", FieldType::Text, "p", None),
            ],
        );
        let records = extract_section(&page(), &section, "shop", Profile::Desktop).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("image"), Some(&json!("/img/n2.jpg")));
    }

    #[tokio::test]
    async fn text_root_without_section_keeps_the_hit() {
        let section = single(
            "shipping",
            Some(Locator::Text("darmowa dostawa".into())),
            vec![field("text", FieldType::Text, SELF_SELECTOR, None)],
        );
        let records = extract_section(&page(), &section, "shop", Profile::Desktop).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("text"), Some(&json!("Darmowa dostawa od 99 zł")));
    }

    #[tokio::test]
    async fn self_selector_reads_the_item() {
        let section = listed(
            "prices",
            Locator::Css("#promos".into()),
            "span.price",
            vec![field("price", FieldType::Text, ":self", None)],
        );
        let records = extract_section(&page(), &section, "shop", Profile::Desktop).await;
        let prices: Vec<_> = records.iter().filter_map(|r| r.get("price")).collect();
        assert_eq!(prices, vec![&json!("12,99 zł"), &json!("8,49 zł"), &json!("5,99 zł")]);
    }

    #[tokio::test]
    async fn missing_input_yields_nothing() {
        let section = single("ghost", None, vec![field("title", FieldType::Text, "h1", None)]);
        assert!(extract_section(&page(), &section, "shop", Profile::Desktop).await.is_empty());
    }

    #[tokio::test]
    async fn unmatched_singleton_root_still_yields_one_record() {
        let p = page();
        let fields = vec![
            field("title", FieldType::Text, "h1", None),
            field("image", FieldType::Image, "img", None),
            field("note", FieldType::TextOptional, "p", None),
            field("whole", FieldType::Text, SELF_SELECTOR, None),
        ];
        for input in [
            Locator::Css("#missing".into()),
            Locator::Css("div[".into()),
            Locator::Xpath("//section[@id='missing']".into()),
            Locator::Text("no such text anywhere".into()),
        ] {
            let section = single("ghost", Some(input), fields.clone());
            let records = extract_section(&p, &section, "shop", Profile::Desktop).await;
            assert_eq!(records.len(), 1);
            let r = &records[0];
            assert_eq!(r.get("title"), Some(&Value::Null));
            assert_eq!(r.get("image"), Some(&Value::Null));
            assert_eq!(r.get("whole"), Some(&Value::Null));
            assert!(!r.contains("note"));
            assert_eq!(r.section(), Some("ghost"));
            assert!(!r.contains("_idx"));
        }
    }

    #[tokio::test]
    async fn unmatched_list_root_yields_no_items() {
        let section = listed(
            "promos",
            Locator::Css("#missing".into()),
            "li.tile",
            vec![field("name", FieldType::Text, "h3", None)],
        );
        assert!(extract_section(&page(), &section, "shop", Profile::Desktop).await.is_empty());
    }

    #[tokio::test]
    async fn xpath_root_and_field_selectors() {
        let section = listed(
            "promos",
            Locator::Xpath("//section[@id='promos']".into()),
            "xpath=//li[@class='tile']",
            vec![
                field("name", FieldType::Text, "xpath=.//h3", None),
                field("link", FieldType::Attr, "//a", Some("href")),
            ],
        );
        let records = extract_section(&page(), &section, "shop", Profile::Desktop).await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("name"), Some(&json!("Krem do rąk")));
        assert_eq!(records[2].get("link"), Some(&json!("/p/3")));
    }

    #[tokio::test]
    async fn list_with_no_matching_items_is_empty() {
        let section = listed(
            "promos",
            Locator::Css("#promos".into()),
            "li.missing",
            vec![field("name", FieldType::Text, "h3", None)],
        );
        assert!(extract_section(&page(), &section, "shop", Profile::Desktop).await.is_empty());
    }
}
