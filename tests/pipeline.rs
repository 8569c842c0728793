//! Resolver and renderer wired together through the public API
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use traceglobe::canvas::BrailleCanvas;
use traceglobe::geo::cache::{CoordinateCache, LruCache};
use traceglobe::geo::lookup::{GeoLookup, LookupError};
use traceglobe::geo::{Address, GeoCoordinate, GeoResolver};
use traceglobe::globe::geometry::BoundarySet;
use traceglobe::globe::projector::{Orientation, Viewport};
use traceglobe::globe::renderer::{DrawCommand, GlobeRenderer, HopRole, Stroke};

struct Table(Arc<AtomicUsize>);

impl GeoLookup for Table {
    fn lookup_batch(&self, addresses: &[Address]) -> Result<Vec<Option<GeoCoordinate>>, LookupError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(addresses
            .iter()
            .map(|a| match a.as_str() {
                "198.51.100.1" => Some(GeoCoordinate::new(-6.26, 53.35)),
                "198.51.100.3" => Some(GeoCoordinate::new(-0.12, 51.51)),
                "198.51.100.4" => Some(GeoCoordinate::new(8.68, 50.11)),
                _ => None,
            })
            .collect())
    }
}

fn hops() -> Vec<Address> {
    ["198.51.100.1", "198.51.100.2", "198.51.100.3", "198.51.100.4"]
        .into_iter()
        .map(Address::new)
        .collect()
}

#[test]
fn resolved_trace_renders_legs_and_markers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(LruCache::default());
    let resolver = GeoResolver::new(Box::new(Table(Arc::clone(&calls))), cache.clone());

    let coords = resolver.resolve(&hops()).unwrap();
    assert_eq!(coords.len(), 3);
    assert_eq!(cache.len(), 4);

    // same trace again is served from the cache
    assert_eq!(resolver.resolve(&hops()).unwrap(), coords);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // yaw a quarter turn so longitude 0 faces the viewer
    let facing_europe = Orientation::new(0.0, std::f64::consts::FRAC_PI_2, 1.0);
    let viewport = Viewport::new(160.0, 160.0);
    let commands = GlobeRenderer::default().render(&BoundarySet::empty(), &coords, &facing_europe, viewport);

    let legs: BTreeSet<usize> = commands
        .iter()
        .filter_map(|c| match c {
            DrawCommand::Line { stroke: Stroke::Trace { leg }, .. } => Some(*leg),
            _ => None,
        })
        .collect();
    assert_eq!(legs, BTreeSet::from([0, 1]));

    let roles: Vec<HopRole> = commands
        .iter()
        .filter_map(|c| match c {
            DrawCommand::Marker { role, .. } => Some(*role),
            _ => None,
        })
        .collect();
    assert_eq!(roles, [HopRole::First, HopRole::Intermediate, HopRole::Last]);

    let mut canvas = BrailleCanvas::new(80, 40);
    assert_eq!(canvas.viewport(), viewport);
    canvas.paint(&commands);
}

#[test]
fn hidden_hops_keep_their_legs_but_lose_markers() {
    let coords = vec![GeoCoordinate::new(-6.26, 53.35), GeoCoordinate::new(8.68, 50.11)];
    // facing the Pacific: Europe is on the far side
    let facing_pacific = Orientation::new(0.0, -std::f64::consts::FRAC_PI_2, 1.0);
    let commands = GlobeRenderer::default().render(
        &BoundarySet::empty(),
        &coords,
        &facing_pacific,
        Viewport::new(160.0, 160.0),
    );
    assert!(!commands.iter().any(|c| matches!(c, DrawCommand::Marker { .. })));
    assert!(!commands
        .iter()
        .any(|c| matches!(c, DrawCommand::Line { stroke: Stroke::Trace { .. }, .. })));
}
