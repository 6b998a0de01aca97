//! Canned components.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use trellis_core::{
    CommonProps, Component, IdentityPath, Size, SizeConstraints, StateUpdate, Transition,
};

/// Name of the root container of [`leaf_list`].
pub const SCREEN: &str = "Screen";
/// Name of the group [`leaf_list`] renders into.
pub const LIST: &str = "List";
pub const COUNTER: &str = "Counter";

#[derive(Debug, Clone, PartialEq)]
pub struct CounterProps {
    pub start: i32,
}

/// Keyed terminal whose state is an `i32` starting at `start`. Measures
/// `10 x 10`.
pub fn counter(key: &str, start: i32) -> Component {
    Component::terminal(COUNTER, CounterProps { start }, |scope| {
        scope.state::<i32>()?;
        Ok(())
    })
    .key(key)
    .state(|props: &CounterProps| props.start)
    .measure(|_, _| Size::new(10.0, 10.0))
    .build()
}

/// Like [`counter`], counting how often its initial state is built.
pub fn counted_counter(key: &str, start: i32, constructions: Arc<AtomicUsize>) -> Component {
    Component::terminal(COUNTER, CounterProps { start }, |_| Ok(()))
        .key(key)
        .state(move |props: &CounterProps| {
            constructions.fetch_add(1, Ordering::SeqCst);
            props.start
        })
        .build()
}

pub fn increment() -> StateUpdate {
    StateUpdate::new(|value: &mut i32| *value += 1)
}

pub fn add(amount: i32) -> StateUpdate {
    StateUpdate::new(move |value: &mut i32| *value += amount)
}

pub fn item_key(index: usize) -> String {
    format!("item-{index}")
}

/// Path of the `index`-th counter of a [`leaf_list`].
pub fn item_path(index: usize) -> IdentityPath {
    IdentityPath::from_raw(format!("{SCREEN},{LIST},${}", item_key(index)))
}

pub fn list_path() -> IdentityPath {
    IdentityPath::from_raw(format!("{SCREEN},{LIST}"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListProps {
    pub count: usize,
}

/// A root container rendering a group of `count` keyed counters.
pub fn leaf_list(count: usize) -> Component {
    let list = Component::group(LIST, ListProps { count }, |scope| {
        let count = scope.props::<ListProps>()?.count;
        Ok((0..count).map(|index| counter(&item_key(index), 0)).collect())
    })
    .build();
    Component::container(SCREEN, ListProps { count }, move |_| Ok(Some(list.clone()))).build()
}

/// Group of `width` groups, each holding `width` keyed counters.
pub fn grid(width: usize) -> Component {
    Component::group("Grid", width, |scope| {
        let width = *scope.props::<usize>()?;
        Ok((0..width)
            .map(|row| {
                Component::group("Row", row, move |_| {
                    Ok((0..width)
                        .map(|column| counter(&format!("cell-{column}"), 0))
                        .collect())
                })
                .key(format!("row-{row}"))
                .build()
            })
            .collect())
    })
    .build()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelProps {
    pub text: String,
}

/// Stateless terminal.
pub fn label(text: &str) -> Component {
    Component::terminal(
        "Label",
        LabelProps {
            text: text.to_owned(),
        },
        |_| Ok(()),
    )
    .measure(|props, _| {
        let width = props
            .downcast_ref::<LabelProps>()
            .map_or(0.0, |props| props.text.len() as f32 * 8.0);
        Size::new(width, 16.0)
    })
    .build()
}

/// Terminal whose prepare routine fails with `message`.
pub fn failing(message: &'static str) -> Component {
    Component::terminal("Failing", message, move |_| Err(message.into())).build()
}

/// Group declaring an error boundary that records the failed paths in
/// `caught`.
pub fn boundary(children: Vec<Component>, caught: Arc<Mutex<Vec<IdentityPath>>>) -> Component {
    let children = Arc::new(children);
    let len = children.len();
    Component::group("Boundary", len, move |_| Ok(children.as_ref().clone()))
        .error_boundary(move |scope| caught.lock().push(scope.failed().clone()))
        .build()
}

/// Group of `children`, stateless and without props beyond their count.
pub fn column(children: Vec<Component>) -> Component {
    let children = Arc::new(children);
    let len = children.len();
    Component::group("Column", len, move |_| Ok(children.as_ref().clone())).build()
}

/// Like [`column`] with common props.
pub fn styled_column(children: Vec<Component>, common: CommonProps) -> Component {
    let children = Arc::new(children);
    let len = children.len();
    Component::group("Column", len, move |_| Ok(children.as_ref().clone()))
        .common(common)
        .build()
}

/// Size-dependent container rendering `narrow` below `threshold` width and
/// `wide` otherwise. `renders` counts render calls.
pub fn responsive(
    threshold: f32,
    narrow: Component,
    wide: Component,
    renders: Arc<AtomicUsize>,
) -> Component {
    Component::container("Responsive", threshold.to_bits(), move |scope| {
        renders.fetch_add(1, Ordering::SeqCst);
        let max_width = scope
            .constraints()
            .map_or(f32::INFINITY, |constraints: SizeConstraints| {
                constraints.max_width
            });
        if max_width < threshold {
            Ok(Some(narrow.clone()))
        } else {
            Ok(Some(wide.clone()))
        }
    })
    .size_dependent()
    .build()
}

/// Terminal with an immediate transition on `property`.
pub fn animated(key: &str, property: &'static str) -> Component {
    Component::terminal("Animated", property, |_| Ok(()))
        .key(key)
        .transition(move |_| Ok(Transition::new(property, 300)))
        .build()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FadeProps {
    pub alpha: u8,
}

/// Terminal whose transition waits for the props of its previous mount.
/// The transition duration is the alpha difference.
pub fn fading(key: &str, alpha: u8) -> Component {
    Component::terminal("Fading", FadeProps { alpha }, |_| Ok(()))
        .key(key)
        .transition(|scope| {
            let current = scope.props::<FadeProps>()?.alpha;
            let previous = scope
                .previous::<FadeProps>()
                .map_or(current, |previous| previous.alpha);
            Ok(Transition::new("alpha", u32::from(current.abs_diff(previous))))
        })
        .needs_previous_render_data()
        .build()
}

/// Terminal recording attach and detach calls in `events` as
/// `"+path"`/`"-path"`.
pub fn tracked(key: &str, events: Arc<Mutex<Vec<String>>>) -> Component {
    let detach_events = Arc::clone(&events);
    Component::terminal("Tracked", key.to_owned(), |_| Ok(()))
        .key(key)
        .on_attach(move |path| events.lock().push(format!("+{path}")))
        .on_detach(move |path| detach_events.lock().push(format!("-{path}")))
        .build()
}
