pub mod dom;
pub mod rewrite;
pub mod rules;
pub mod serialize;

use crate::budget::Budget;
use crate::content::InlineImage;
use crate::device::DeviceProfile;
pub use rewrite::{ImageJob, JobKind, Prepared, apply_images, prepare};
pub use serialize::Serialized;

/// Finishes a prepared document: applies the transcoded images in document
/// order under the budget, then serializes within the device's page cap.
pub fn finish(
    mut prepared: Prepared,
    images: Vec<(ImageJob, Option<InlineImage>)>,
    budget: &mut Budget,
    device: &DeviceProfile,
) -> Serialized {
    apply_images(&mut prepared.dom, images, budget);
    serialize::serialize(&prepared.dom, device.max_page_bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transcode::dom::{Dom, NodeData, NodeId};
    use std::time::{Duration, Instant};
    use url::Url;

    fn request_url() -> Url {
        Url::parse("http://example.com/page.html").unwrap()
    }

    fn transcode_plain(source: &str) -> String {
        let prepared = prepare(source, &request_url());
        let mut budget = Budget::new(512 * 1024, Instant::now() + Duration::from_secs(30));
        finish(prepared, Vec::new(), &mut budget, &DeviceProfile::default()).html
    }

    fn assert_allow_list_closure(dom: &Dom, id: NodeId) {
        if let NodeData::Element(element) = dom.data(id) {
            let allowed = rules::allowed_attrs(&element.tag)
                .unwrap_or_else(|| panic!("tag <{}> escaped the allow-list", element.tag));
            for (name, value) in &element.attrs {
                if value.starts_with(crate::ebd::DATA_PREFIX) {
                    continue;
                }
                assert!(
                    allowed.iter().any(|rule| rule.name == &**name),
                    "attribute {name} escaped the allow-list on <{}>",
                    element.tag
                );
            }
        }
        for &child in dom.children(id) {
            assert_allow_list_closure(dom, child);
        }
    }

    #[test]
    fn all_output_tags_and_attrs_are_allowed() {
        let source = r#"
            <html><head><title>t</title><link rel="stylesheet" href="x.css"></head>
            <body onload="evil()">
                <span class="x">spanned</span>
                <article data-id="3"><p style="color:red" align="left">text</p></article>
                <video src="a.mp4"><track src="b"></video>
                <a href="http://ok.example/" onclick="evil()">link</a>
            </body></html>"#;
        let prepared = prepare(source, &request_url());
        assert_allow_list_closure(&prepared.dom, prepared.dom.root());
    }

    #[test]
    fn unknown_tags_strip_but_keep_children() {
        let html = transcode_plain("<body><span>kept text</span></body>");
        assert!(html.contains("kept text"));
        assert!(!html.to_lowercase().contains("span"));
    }

    #[test]
    fn scripts_and_styles_are_deleted_with_contents() {
        let html = transcode_plain(
            "<body><script>var x = 'leaky';</script><style>.a{}</style><p>visible</p><noscript>fallback</noscript></body>",
        );
        assert!(!html.contains("leaky"));
        assert!(!html.contains(".a{}"));
        assert!(html.contains("visible"));
        // noscript is stripped, not deleted: its contents are all the client will run
        assert!(html.contains("fallback"));
    }

    #[test]
    fn disallowed_schemes_drop_href_but_keep_text() {
        let html = transcode_plain(r#"<body><a href="javascript:alert(1)">click me</a></body>"#);
        assert!(html.contains("<A>click me</A>"));
        assert!(!html.contains("javascript"));
    }

    #[test]
    fn relative_urls_resolve_against_base_element() {
        let source = r#"<head><base href="http://cdn.example.com/assets/"></head><body><a href="doc.html">d</a></body>"#;
        let prepared = prepare(source, &request_url());
        assert_eq!(prepared.base.as_str(), "http://cdn.example.com/assets/");

        let html = transcode_plain(source);
        assert!(html.contains(r#"HREF="http://cdn.example.com/assets/doc.html""#));
    }

    #[test]
    fn meta_refresh_becomes_continue_link() {
        let source = r#"<head><meta http-equiv="refresh" content="3; url=/next.html"></head><body>wait</body>"#;
        let html = transcode_plain(source);
        assert!(html.contains(r#"<A HREF="http://example.com/next.html">Continue</A>"#));
        assert!(!html.contains("<META"));
    }

    #[test]
    fn ordinary_meta_is_deleted() {
        let html = transcode_plain(r#"<head><meta charset="utf-8"><meta name="viewport" content="x"></head><body>b</body>"#);
        assert!(!html.contains("<META"));
    }

    #[test]
    fn img_without_src_falls_back_to_alt() {
        let html = transcode_plain(r#"<body><img alt="a photo"><img></body>"#);
        assert!(html.contains("a photo"));
        assert!(!html.contains("<IMG"));
    }

    #[test]
    fn nested_tables_flatten_to_br_runs() {
        let source = r#"
            <body><table><tr>
                <td>outer one</td>
                <td><table><tr><td>inner</td></tr></table></td>
            </tr></table></body>"#;
        let html = transcode_plain(source);

        // The outer table dissolved; the inner one survived intact
        assert_eq!(html.matches("<TABLE").count(), 1);
        assert!(html.contains("outer one<BR>"));
        assert!(html.contains("<TD>inner</TD>"));
    }

    #[test]
    fn triple_nesting_leaves_only_innermost_table() {
        let source = "<body><table><tr><td>a<table><tr><td>b<table><tr><td>c</td></tr></table></td></tr></table></td></tr></table></body>";
        let html = transcode_plain(source);
        assert_eq!(html.matches("<TABLE").count(), 1);
        for text in ["a", "b", "c"] {
            assert!(html.contains(text));
        }
    }

    #[test]
    fn single_table_renders_as_table() {
        let html = transcode_plain("<body><table><tr><td>cell</td></tr></table></body>");
        assert!(html.contains("<TABLE><TR><TD>cell</TD></TR></TABLE>"));
    }

    #[test]
    fn transcoding_legal_document_is_idempotent() {
        let source = r##"<html><head><title>Legal</title></head><body bgcolor="#ffffff"><h1 align="center">Hi</h1><p>text</p><hr><table><tr><td>cell</td></tr></table></body></html>"##;
        let first = transcode_plain(source);
        let second = transcode_plain(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn inline_ebd_images_pass_through_unfetched() {
        let source = r#"<body><img src="data:image/x-ebd;base64,AQACAAKAQA==" ebdwidth="2" ebdheight="2"></body>"#;
        let prepared = prepare(source, &request_url());
        assert!(prepared.jobs.is_empty());

        let html = transcode_plain(source);
        assert!(html.contains("data:image/x-ebd;base64,AQACAAKAQA=="));
        assert!(html.contains(r#"EBDWIDTH="2""#));
    }

    #[test]
    fn image_jobs_collected_in_document_order() {
        let source = r#"<body background="bg.gif"><img src="one.png"><p><img src="two.jpg"></p></body>"#;
        let prepared = prepare(source, &request_url());

        let urls: Vec<String> = prepared.jobs.iter().map(|job| job.url.to_string()).collect();
        assert_eq!(
            urls,
            [
                "http://example.com/bg.gif",
                "http://example.com/one.png",
                "http://example.com/two.jpg"
            ]
        );
    }

    #[test]
    fn failed_image_degrades_to_alt() {
        let source = r#"<body><img src="broken.png" alt="sunset"></body>"#;
        let prepared = prepare(source, &request_url());
        let jobs = prepared.jobs.clone();
        let mut budget = Budget::new(512 * 1024, Instant::now() + Duration::from_secs(30));

        let results = jobs.into_iter().map(|job| (job, None)).collect();
        let out = finish(prepared, results, &mut budget, &DeviceProfile::default());
        assert!(out.html.contains("sunset"));
        assert!(!out.html.contains("<IMG"));
    }

    #[test]
    fn successful_image_gets_ebd_attributes() {
        let ebd = crate::ebd::encode(&[0, 1, 1, 0], 2, 2, crate::device::ColorDepth::Mono).unwrap();
        let inline = InlineImage::from_ebd(&ebd);

        let source = r#"<body><img src="ok.png" alt="x"></body>"#;
        let prepared = prepare(source, &request_url());
        let jobs = prepared.jobs.clone();
        let mut budget = Budget::new(512 * 1024, Instant::now() + Duration::from_secs(30));

        let results = jobs.into_iter().map(|job| (job, Some(inline.clone()))).collect();
        let out = finish(prepared, results, &mut budget, &DeviceProfile::default());
        assert!(out.html.contains(r#"EBDWIDTH="2""#));
        assert!(out.html.contains(r#"EBDHEIGHT="2""#));
        assert!(out.html.contains("data:image/x-ebd;base64,"));
    }

    #[test]
    fn over_budget_image_is_skipped() {
        let ebd = crate::ebd::encode(&vec![0; 100 * 100], 100, 100, crate::device::ColorDepth::Color8).unwrap();
        let inline = InlineImage::from_ebd(&ebd);

        let source = r#"<body><img src="big.png" alt="too big"><p>after</p></body>"#;
        let prepared = prepare(source, &request_url());
        let jobs = prepared.jobs.clone();
        // Budget far smaller than the inline payload
        let mut budget = Budget::new(512, Instant::now() + Duration::from_secs(30));

        let results = jobs.into_iter().map(|job| (job, Some(inline.clone()))).collect();
        let out = finish(prepared, results, &mut budget, &DeviceProfile::default());
        assert!(out.html.contains("too big"));
        assert!(!out.html.contains("data:image/x-ebd"));
        assert!(out.html.contains("after"));
    }

    #[test]
    fn oversized_document_truncates_with_notice() {
        let body: String = (0..5000).map(|i| format!("<p>filler paragraph {i}</p>")).collect();
        let prepared = prepare(&format!("<body>{body}</body>"), &request_url());
        let mut budget = Budget::new(512 * 1024, Instant::now() + Duration::from_secs(30));

        let mut device = DeviceProfile::default();
        device.max_page_bytes = 8 * 1024;
        let out = finish(prepared, Vec::new(), &mut budget, &device);
        assert!(out.truncated);
        assert!(out.html.len() <= 8 * 1024);
        assert!(out.html.contains("[Page truncated]"));
    }
}
