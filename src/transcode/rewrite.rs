use crate::budget::Budget;
use crate::content::InlineImage;
use crate::ebd;
use crate::transcode::dom::{Dom, Element, NodeId};
use crate::transcode::rules;
use url::Url;

/// An image reference discovered during the rewrite pass. The orchestrator
/// fetches and transcodes these concurrently, then applies the results in
/// document order.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub node: NodeId,
    pub url: Url,
    pub kind: JobKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    ImgSrc,
    Background,
}

pub struct Prepared {
    pub dom: Dom,
    pub base: Url,
    pub jobs: Vec<ImageJob>,
}

/// Parses and rewrites a document down to the Xiino-legal subset,
/// collecting the image work to be done. Pure CPU; no I/O happens here.
pub fn prepare(source: &str, request_url: &Url) -> Prepared {
    let mut dom = Dom::parse(source);
    let base = document_base(&dom, request_url);

    let mut jobs = Vec::new();
    let root = dom.root();
    rewrite_children(&mut dom, root, &base, &mut jobs);
    flatten_nested_tables(&mut dom);

    Prepared { dom, base, jobs }
}

/// The effective base URL: the first valid `<base href>` wins, otherwise
/// the request URL itself.
fn document_base(dom: &Dom, request_url: &Url) -> Url {
    dom.elements_named("base")
        .first()
        .and_then(|&node| dom.element(node))
        .and_then(|element| element.attr("href"))
        .and_then(|href| rules::resolve_url(href, request_url))
        .unwrap_or_else(|| request_url.clone())
}

/*
    The single top-down pass. Children are re-read from the arena on every
    step because strip() splices grandchildren into the current position:
    after a strip or delete the same index is examined again, after a kept
    element the index advances past it.
*/
fn rewrite_children(dom: &mut Dom, parent: NodeId, base: &Url, jobs: &mut Vec<ImageJob>) {
    let mut index = 0;
    while index < dom.children(parent).len() {
        let child = dom.children(parent)[index];
        let Some(element) = dom.element(child) else {
            index += 1;
            continue;
        };
        let tag = element.tag.clone();

        if rules::is_deleted(&tag) {
            dom.delete(child);
            continue;
        }
        if tag == "meta" {
            rewrite_meta(dom, child, base);
            continue;
        }

        let Some(allowed) = rules::allowed_attrs(&tag) else {
            dom.strip(child);
            continue;
        };

        filter_attrs(dom, child, allowed, base);
        match &*tag {
            "img" => {
                let element = dom.element(child).expect("img node must be an element");
                let src = element.attr("src");
                if src.is_some_and(|src| src.starts_with(ebd::DATA_PREFIX)) {
                    // Already-inline images pass through, provided they
                    // still carry their decode dimensions
                    if element.attr("ebdwidth").is_none() || element.attr("ebdheight").is_none() {
                        replace_with_alt(dom, child);
                        continue;
                    }
                } else if let Some(url) = src.and_then(|src| Url::parse(src).ok()) {
                    jobs.push(ImageJob { node: child, url, kind: JobKind::ImgSrc });
                } else {
                    replace_with_alt(dom, child);
                    continue;
                }
            }
            "body" => {
                let background = dom
                    .element(child)
                    .and_then(|element| element.attr("background"))
                    .filter(|background| !background.starts_with(ebd::DATA_PREFIX))
                    .and_then(|background| Url::parse(background).ok());
                if let Some(url) = background {
                    jobs.push(ImageJob { node: child, url, kind: JobKind::Background });
                }
            }
            _ => (),
        }

        rewrite_children(dom, child, base, jobs);
        index += 1;
    }
}

fn filter_attrs(dom: &mut Dom, node: NodeId, allowed: &[rules::AttrRule], base: &Url) {
    let Some(element) = dom.element_mut(node) else {
        return;
    };

    let attrs = std::mem::take(&mut element.attrs);
    element.attrs = attrs
        .into_iter()
        .filter_map(|(name, value)| {
            // Inline EBD payloads are our own output; revalidating them as
            // URLs would reject the data scheme.
            if value.starts_with(ebd::DATA_PREFIX) {
                return Some((name, value));
            }
            let rule = allowed.iter().find(|rule| rule.name == &*name)?;
            rules::validate(rule.value, &value, base).map(|kept| (name, kept))
        })
        .collect();
}

/// `<meta http-equiv=refresh>` becomes a plain link the user can follow;
/// every other `<meta>` is head metadata the client has no use for.
fn rewrite_meta(dom: &mut Dom, node: NodeId, base: &Url) {
    let refresh_target = dom.element(node).and_then(|element| {
        let http_equiv = element.attr("http-equiv")?;
        http_equiv.eq_ignore_ascii_case("refresh").then_some(())?;
        refresh_url(element.attr("content")?, base)
    });

    match refresh_target {
        Some(url) => {
            let mut anchor = Element::new("a");
            anchor.set_attr("href", url.into());
            let anchor = dom.create_element(anchor);
            let text = dom.create_text("Continue");
            dom.append_child(anchor, text);
            dom.replace_with(node, vec![anchor]);
        }
        None => dom.delete(node),
    }
}

/// Extracts the target from a refresh directive like `5; url=/next` or
/// `0;URL='http://x'`.
fn refresh_url(content: &str, base: &Url) -> Option<Url> {
    let url_part = content.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim().eq_ignore_ascii_case("url").then_some(value.trim())
    })?;
    let unquoted = url_part.trim_matches(|c| c == '\'' || c == '"');
    rules::resolve_url(unquoted, base)
}

fn replace_with_alt(dom: &mut Dom, node: NodeId) {
    let alt = dom
        .element(node)
        .and_then(|element| element.attr("alt"))
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .map(String::from);
    match alt {
        Some(alt) => {
            let text = dom.create_text(alt);
            dom.replace_with(node, vec![text]);
        }
        None => dom.delete(node),
    }
}

/*
    The client renders at most one level of tables: any table containing
    another is demoted to a run of its cell contents separated by <BR>,
    in document order. Cells of the nested tables are left alone here;
    an inner table that itself contains a third level gets demoted on its
    own turn.
*/
fn flatten_nested_tables(dom: &mut Dom) {
    for table in dom.elements_named("table") {
        if dom.has_descendant_tag(table, "table") {
            flatten_table(dom, table);
        }
    }
}

fn flatten_table(dom: &mut Dom, table: NodeId) {
    let mut replacement = Vec::new();
    collect_cells(dom, table, &mut replacement);
    if replacement.last().is_some_and(|&last| is_br(dom, last)) {
        replacement.pop();
    }
    dom.replace_with(table, replacement);
}

fn collect_cells(dom: &mut Dom, node: NodeId, out: &mut Vec<NodeId>) {
    for child in dom.children(node).to_vec() {
        match dom.element(child).map(|element| element.tag.clone()) {
            Some(tag) if tag == "tr" => collect_cells(dom, child, out),
            Some(tag) if tag == "td" || tag == "th" || tag == "caption" => {
                let contents = dom.take_children(child);
                if !contents.is_empty() {
                    out.extend(contents);
                    out.push(dom.create_element(Element::new("br")));
                }
            }
            _ => {
                // Stray content directly under the table structure
                dom.delete(child);
                out.push(child);
            }
        }
    }
}

fn is_br(dom: &Dom, node: NodeId) -> bool {
    matches!(dom.element(node), Some(element) if &*element.tag == "br")
}

/// Applies transcoded images in document order, charging the page budget
/// as it goes. A failed or over-budget image degrades to its ALT text; a
/// failed background is simply dropped.
pub fn apply_images(dom: &mut Dom, results: Vec<(ImageJob, Option<InlineImage>)>, budget: &mut Budget) {
    for (job, result) in results {
        let inline = match result {
            Some(image) if budget.try_take_image() && image.charge(budget) => Some(image),
            _ => None,
        };
        match (job.kind, inline) {
            (JobKind::ImgSrc, Some(image)) => {
                if let Some(element) = dom.element_mut(job.node) {
                    element.set_attr("src", image.src);
                    element.set_attr("ebdwidth", image.width.to_string());
                    element.set_attr("ebdheight", image.height.to_string());
                }
            }
            (JobKind::ImgSrc, None) => replace_with_alt(dom, job.node),
            (JobKind::Background, Some(image)) => {
                if let Some(element) = dom.element_mut(job.node) {
                    element.set_attr("background", image.src);
                }
            }
            (JobKind::Background, None) => {
                if let Some(element) = dom.element_mut(job.node) {
                    element.remove_attr("background");
                }
            }
        }
    }
}
