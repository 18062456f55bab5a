//! Profile propagation into child frames.
//!
//! A fresh same-origin frame is a clean realm with untouched prototypes,
//! so reading identity values out of it sidesteps page-level normalization.
//! Every frame gets the parent's profile and its own guard. Frames are
//! caught synchronously when the page reads `contentWindow` or
//! `contentDocument`, when they enter the DOM, and again after each load.

use std::rc::Rc;

use js_sys::{Array, Object, Reflect, WeakSet};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, MutationObserver, MutationObserverInit, MutationRecord, Node};

use super::proxy_helpers::{call_method, wrap_getter, Realm};
use super::{normalize_once, PassContext};
use crate::error::{isolated, FingerprintError, Result};

const FRAME_SELECTOR: &str = "iframe, frame";

thread_local! {
    // frames that already carry a load listener
    static WATCHED_FRAMES: WeakSet = WeakSet::new();
}

pub fn is_frame_tag(node_name: &str) -> bool {
    node_name.eq_ignore_ascii_case("iframe") || node_name.eq_ignore_ascii_case("frame")
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    let mut hooked = 0;
    if isolated("HTMLIFrameElement accessors", || wrap_frame_accessors(ctx)) {
        hooked += 1;
    }
    if isolated("frame observer", || observe_insertions(ctx)) {
        hooked += 1;
    }
    isolated("existing frames", || protect_existing(ctx));
    if hooked == 0 {
        return Err(FingerprintError::missing("HTMLIFrameElement"));
    }
    Ok(())
}

/// Normalize a frame's window with the parent's profile, once.
///
/// Returns false for the parent's own window, detached frames and
/// cross-origin windows, whose guard flag cannot be read.
pub fn protect_window(parent: &PassContext, window: &JsValue) -> bool {
    let realm = match Realm::from_window(window) {
        Some(realm) => realm,
        None => return false,
    };
    if Object::is(realm.global(), parent.realm.global()) {
        return false;
    }
    let child = PassContext {
        realm,
        profile: Rc::clone(&parent.profile),
        components: parent.components.clone(),
    };
    match normalize_once(&child) {
        Some(report) => {
            log::debug!("frame normalized: {}", report.applied.join(", "));
            true
        }
        None => false,
    }
}

fn wrap_frame_accessors(ctx: &PassContext) -> Result<()> {
    let proto = ctx.realm.prototype("HTMLIFrameElement")?;

    let parent = ctx.clone();
    wrap_getter(&proto, "contentWindow", move |getter, this| {
        let window = getter.call0(this)?;
        protect_window(&parent, &window);
        Ok(window)
    })?;

    let parent = ctx.clone();
    wrap_getter(&proto, "contentDocument", move |getter, this| {
        let document = getter.call0(this)?;
        if document.is_object() {
            let view = Reflect::get(&document, &JsValue::from_str("defaultView"))?;
            protect_window(&parent, &view);
        }
        Ok(document)
    })
}

fn observe_insertions(ctx: &PassContext) -> Result<()> {
    let document = ctx.realm.document()?;
    let parent = ctx.clone();
    let callback = Closure::wrap(Box::new(move |records: Array, _observer: JsValue| {
        for record in records.iter() {
            let added = record.unchecked_ref::<MutationRecord>().added_nodes();
            for index in 0..added.length() {
                if let Some(node) = added.item(index) {
                    protect_subtree(&parent, &node);
                }
            }
        }
    }) as Box<dyn FnMut(Array, JsValue)>);

    let observer = MutationObserver::new(callback.as_ref().unchecked_ref())?;
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    // the document itself, since documentElement may not exist yet
    observer.observe_with_options(document.unchecked_ref::<Node>(), &init)?;
    callback.forget();
    Ok(())
}

fn protect_existing(ctx: &PassContext) -> Result<()> {
    let document = ctx.realm.document()?;
    let frames = document
        .unchecked_ref::<Document>()
        .query_selector_all(FRAME_SELECTOR)?;
    for index in 0..frames.length() {
        if let Some(frame) = frames.item(index) {
            protect_frame(ctx, &frame.into());
        }
    }
    Ok(())
}

fn protect_subtree(parent: &PassContext, node: &Node) {
    if node.node_type() != Node::ELEMENT_NODE {
        return;
    }
    if is_frame_tag(&node.node_name()) {
        protect_frame(parent, &node.clone().into());
        return;
    }
    let nested = match node.unchecked_ref::<Element>().query_selector_all(FRAME_SELECTOR) {
        Ok(nested) => nested,
        Err(_) => return,
    };
    for index in 0..nested.length() {
        if let Some(frame) = nested.item(index) {
            protect_frame(parent, &frame.into());
        }
    }
}

fn protect_frame(parent: &PassContext, frame: &JsValue) {
    if let Ok(window) = Reflect::get(frame, &JsValue::from_str("contentWindow")) {
        protect_window(parent, &window);
    }
    watch_loads(parent, frame);
}

/// Re-run protection whenever the frame navigates to a new document.
fn watch_loads(parent: &PassContext, frame: &JsValue) {
    if !frame.is_object() {
        return;
    }
    let key: &Object = frame.unchecked_ref();
    let fresh = WATCHED_FRAMES.with(|watched| {
        if watched.has(key) {
            false
        } else {
            watched.add(key);
            true
        }
    });
    if !fresh {
        return;
    }

    let parent = parent.clone();
    let target = frame.clone();
    let on_load = Closure::wrap(Box::new(move |_event: JsValue| {
        if let Ok(window) = Reflect::get(&target, &JsValue::from_str("contentWindow")) {
            protect_window(&parent, &window);
        }
    }) as Box<dyn FnMut(JsValue)>);
    let listener: JsValue = on_load.as_ref().clone();
    if let Err(err) = call_method(frame, "addEventListener", &[JsValue::from_str("load"), listener]) {
        log::trace!("frame load listener: {}", err);
    }
    on_load.forget();
}
