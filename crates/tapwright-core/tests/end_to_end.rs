//! Snapshot-to-gesture flows across hierarchy, resolver and motion.

use tapwright_core::bounds::{Bounds, Point};
use tapwright_core::hierarchy::Hierarchy;
use tapwright_core::motion::{generate, Easing, MotionOptions};
use tapwright_core::resolver::{
    element_center, is_fully_visible, visible_center, ElementResolver, Insets, TextQuery,
};

const TWO_CHILDREN: &str = r#"{
    "hierarchy": {
        "node": {
            "class": "android.widget.FrameLayout",
            "bounds": "[0,0][100,100]",
            "node": [
                {"text": "Tap me", "clickable": "true", "bounds": "[0,0][100,50]"},
                {"text": "Just text", "bounds": "[0,50][100,100]"}
            ]
        }
    }
}"#;

const LOGIN_SCREEN: &str = r#"{
    "hierarchy": {
        "node": {
            "class": "android.widget.FrameLayout",
            "bounds": "[0,0][1080,2400]",
            "node": [
                {
                    "resource-id": "com.example:id/header",
                    "bounds": "[0,0][1080,200]",
                    "node": {"text": "Sign in", "bounds": "[40,60][400,140]"}
                },
                {
                    "resource-id": "com.example:id/form",
                    "class": "android.widget.ScrollView",
                    "scrollable": "true",
                    "bounds": "[0,200][1080,2200]",
                    "node": [
                        {"resource-id": "com.example:id/email", "class": "android.widget.EditText",
                         "focused": "true", "bounds": "[40,300][1040,420]"},
                        {"resource-id": "com.example:id/password", "class": "android.widget.EditText",
                         "bounds": "[40,460][1040,580]"},
                        {"resource-id": "com.example:id/submit", "class": "android.widget.Button",
                         "text": "Sign in", "clickable": "true", "bounds": "[40,2100][1040,2300]"}
                    ]
                }
            ]
        }
    }
}"#;

#[test]
fn clickable_child_and_its_center() {
    let hierarchy = Hierarchy::from_json_str(TWO_CHILDREN).unwrap();
    let resolver = ElementResolver::new(&hierarchy);

    let clickable = resolver.find_clickable();
    assert_eq!(clickable.len(), 1);
    assert_eq!(clickable[0].text(), Some("Tap me"));
    assert_eq!(clickable[0].bounds, Bounds::new(0, 0, 100, 50).unwrap());
    assert_eq!(element_center(clickable[0]), Point::new(50, 25));
}

#[test]
fn index_lookups_stay_inside_the_flattened_tree() {
    let hierarchy = Hierarchy::from_json_str(TWO_CHILDREN).unwrap();
    let resolver = ElementResolver::new(&hierarchy);

    let flat = resolver.flatten();
    assert_eq!(flat.len(), 3);
    for entry in &flat {
        let by_index = resolver.find_by_index(entry.index as i64).unwrap();
        assert!(std::ptr::eq(by_index, entry.element));
    }
    assert!(resolver.find_by_index(flat.len() as i64).is_none());
    assert!(resolver.find_by_index(-1).is_none());
}

#[test]
fn container_scoping_never_leaks() {
    let hierarchy = Hierarchy::from_json_str(LOGIN_SCREEN).unwrap();
    let resolver = ElementResolver::new(&hierarchy);

    // "Sign in" appears in the header and on the submit button; the header
    // label has the smaller area.
    let unscoped = resolver.find_by_text("sign in", TextQuery::default()).unwrap();
    assert_eq!(unscoped.bounds.top(), 60);

    let scoped = resolver
        .find_by_text_in("com.example:id/form", "sign in", TextQuery::default())
        .unwrap()
        .unwrap();
    assert_eq!(scoped.resource_id(), Some("com.example:id/submit"));

    let ids = resolver
        .find_by_resource_id_in("com.example:id/form", "password", true)
        .unwrap();
    assert_eq!(ids.len(), 1);

    assert!(resolver
        .find_by_resource_id_in("missing_container", "com.example:id/email", false)
        .is_err());
    assert!(resolver
        .find_by_text_in("missing_container", "Sign in", TextQuery::default())
        .is_err());
}

#[test]
fn scroll_target_into_view_then_tap() {
    let hierarchy = Hierarchy::from_json_str(LOGIN_SCREEN).unwrap();
    let resolver = ElementResolver::new(&hierarchy);
    let screen = Bounds::new(0, 0, 1080, 2400).unwrap();
    let insets = Insets {
        top: 0,
        bottom: 200,
        left: 0,
        right: 0,
    };

    let submit = resolver
        .find_first_by_resource_id("com.example:id/submit", false)
        .unwrap();
    assert!(!is_fully_visible(&submit.bounds, &screen, &insets));
    assert_eq!(visible_center(submit, &screen, &insets), Some(Point::new(540, 2150)));

    let scroller = resolver.find_scrollable()[0];
    let start = element_center(scroller);
    let end = Point::new(start.x, scroller.bounds.top() + 100);
    let path = generate(
        start,
        end,
        MotionOptions {
            steps: 10,
            easing: Easing::EaseInOutQuad,
            duration_ms: Some(300),
        },
    )
    .unwrap();

    assert_eq!(path.len(), 11);
    assert_eq!((path[0].x, path[0].y), (start.x, start.y));
    assert_eq!((path[10].x, path[10].y), (end.x, end.y));
    assert!(path.windows(2).all(|w| w[1].y <= w[0].y));
    assert_eq!(path.iter().filter_map(|p| p.delay).sum::<u64>(), 300);

    let focused = resolver.find_focused().unwrap();
    assert_eq!(focused.resource_id(), Some("com.example:id/email"));
    // The submit button overhangs the scroll view and is not a geometric child.
    assert_eq!(resolver.find_children(scroller).len(), 2);
}
