//! Tracking of bodies going through a portal mouth, and the per-frame crossing decision.

use bevy::{
    prelude::*,
    utils::{HashMap, HashSet},
};

use super::teleport::{
    destination_position, destination_rotation, destination_velocity, PortalFrame,
};
use crate::plugins::physics::EntityKind;

/// Distance from the portal plane beyond which a tracked body is considered gone.
pub const CROSSING_WINDOW: f32 = 2.;

/// Snapshot of a body as far as teleportation is concerned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitBody {
    pub translation: Vec3,
    pub rotation: Quat,
    pub linvel: Vec3,
    pub half_height: f32,
    pub kind: EntityKind,
    pub movable: bool,
}

/// Access to the bodies a portal moves around.
pub trait TransitWorld {
    /// `None` once the object has been despawned.
    fn body(&self, object: Entity) -> Option<TransitBody>;
    fn write_body(&mut self, object: Entity, translation: Vec3, rotation: Quat, linvel: Vec3);
    /// Make a collider a trigger (`true`) or solid again (`false`).
    fn set_passable(&mut self, collider: Entity, passable: bool);
}

#[derive(Debug, Clone, Copy)]
struct Passenger {
    collider: Entity,
    anchor: Vec3,
}

/// Outcome of one [`PortalState::update`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransitReport {
    pub teleported: Vec<Entity>,
    pub dropped: Vec<Entity>,
}

#[derive(Debug, Clone)]
pub struct PortalState {
    frame: PortalFrame,
    destination: Option<Entity>,
    surface: Option<Entity>,
    passing: HashMap<Entity, Passenger>,
    marked_for_removal: HashSet<Entity>,
}

impl PortalState {
    pub fn new(frame: PortalFrame, surface: Option<Entity>) -> PortalState {
        PortalState {
            frame,
            destination: None,
            surface,
            passing: HashMap::default(),
            marked_for_removal: HashSet::default(),
        }
    }

    pub fn frame(&self) -> &PortalFrame {
        &self.frame
    }

    pub fn destination(&self) -> Option<Entity> {
        self.destination
    }

    pub fn surface(&self) -> Option<Entity> {
        self.surface
    }

    pub fn set_destination(&mut self, destination: Option<Entity>) {
        self.destination = destination;
    }

    pub fn is_tracking(&self, object: Entity) -> bool {
        self.passing.contains_key(&object)
    }

    pub fn passing_len(&self) -> usize {
        self.passing.len()
    }

    /// Move the portal. Everything in transit is forgotten; the returned colliders were left
    /// passable by this portal and must be made solid again.
    pub fn place(&mut self, frame: PortalFrame, surface: Option<Entity>) -> Vec<Entity> {
        let mut restore: Vec<Entity> = Vec::new();
        if !self.passing.is_empty() {
            if self.frame.is_horizontal() {
                restore.extend(self.passing.values().map(|p| p.collider));
            } else {
                restore.extend(self.surface);
            }
        }
        self.passing.clear();
        self.marked_for_removal.clear();
        self.frame = frame;
        self.surface = surface;
        restore
    }

    /// Start tracking an object which began overlapping the portal mouth at `entry`.
    ///
    /// Returns `false` when the object is the backing surface, is already tracked, or is waiting
    /// to be flushed, so repeated overlap notifications are harmless.
    pub fn add_to_passing(&mut self, object: Entity, collider: Entity, entry: Vec3) -> bool {
        if self.surface == Some(object)
            || self.passing.contains_key(&object)
            || self.marked_for_removal.contains(&object)
        {
            return false;
        }
        let anchor = self.frame.project_onto_plane(entry);
        self.passing.insert(object, Passenger { collider, anchor });
        true
    }

    /// Ask for `object` to stop being tracked at the next update.
    pub fn assert_removal(&mut self, object: Entity) {
        if self.passing.contains_key(&object) {
            self.marked_for_removal.insert(object);
        }
    }

    /// Teleport whatever crossed the plane since last frame and drop what wandered off.
    ///
    /// `destination` is the frame of the linked portal. Without it, or without a backing
    /// surface, the portal is inert and nothing happens.
    pub fn update(
        &mut self,
        destination: Option<&PortalFrame>,
        world: &mut impl TransitWorld,
    ) -> TransitReport {
        let mut report = TransitReport::default();
        let (Some(destination), Some(surface)) = (destination, self.surface) else {
            return report;
        };
        if self.destination.is_none() {
            return report;
        }

        let toggle_object = self.frame.is_horizontal();
        for (&object, passenger) in self.passing.iter() {
            if self.marked_for_removal.contains(&object) {
                continue;
            }
            let Some(body) = world.body(object) else {
                warn!("Portal passenger {object:?} no longer exists, dropping it");
                self.marked_for_removal.insert(object);
                report.dropped.push(object);
                continue;
            };

            if toggle_object {
                world.set_passable(passenger.collider, true);
            } else {
                world.set_passable(surface, true);
            }

            let dot = self.frame.signed_distance(body.translation);
            if dot < 0. && dot > -CROSSING_WINDOW {
                if body.movable {
                    let translation = destination_position(
                        &self.frame,
                        destination,
                        body.translation,
                        Some(passenger.anchor),
                        body.half_height,
                    );
                    let rotation =
                        destination_rotation(&self.frame, destination, body.rotation, body.kind);
                    let linvel = destination_velocity(&self.frame, destination, body.linvel);
                    world.write_body(object, translation, rotation, linvel);
                    info!(
                        "Teleported {object:?} from {} to {translation}",
                        body.translation
                    );
                    report.teleported.push(object);
                } else {
                    debug!("Not teleporting static body {object:?}");
                }
                self.marked_for_removal.insert(object);
            } else if dot.abs() > CROSSING_WINDOW {
                debug!("{object:?} left the portal without crossing (distance {dot})");
                self.marked_for_removal.insert(object);
                report.dropped.push(object);
            } else {
                trace!("{object:?} approaching portal, distance {dot}");
            }
        }

        self.flush(world);
        report
    }

    fn flush(&mut self, world: &mut impl TransitWorld) {
        let had_passengers = !self.passing.is_empty();
        for object in self.marked_for_removal.drain() {
            if let Some(passenger) = self.passing.remove(&object) {
                if self.frame.is_horizontal() {
                    world.set_passable(passenger.collider, false);
                }
            }
        }
        if had_passengers && self.passing.is_empty() {
            if let Some(surface) = self.surface {
                world.set_passable(surface, false);
            }
        }
    }
}

/// Last teleport time of every object, shared by all portals.
#[derive(Debug, Resource)]
pub struct TeleportCooldown {
    window: f64,
    last: HashMap<Entity, f64>,
}

impl TeleportCooldown {
    pub fn new(window: f64) -> TeleportCooldown {
        TeleportCooldown {
            window,
            last: HashMap::default(),
        }
    }

    pub fn is_cooling(&self, object: Entity, now: f64) -> bool {
        self.last
            .get(&object)
            .map_or(false, |last| now - last < self.window)
    }

    pub fn stamp(&mut self, object: Entity, now: f64) {
        self.last.insert(object, now);
    }

    pub fn prune(&mut self, now: f64) {
        let window = self.window;
        self.last.retain(|_, last| now - *last < window);
    }
}

impl Default for TeleportCooldown {
    fn default() -> Self {
        TeleportCooldown::new(0.2)
    }
}

/// What an overlap event on a portal mouth means for that portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapResponse {
    Track,
    /// The object left the mouth; forget it unless it is already behind the plane.
    Release,
    Ignore,
}

/// Decide how the portal at `frame` handles an overlap begin (`started`) or end.
///
/// `kind` is `None` when the collider does not belong to a teleportable body.
pub fn overlap_response(
    started: bool,
    object: Entity,
    kind: Option<EntityKind>,
    frame: &PortalFrame,
    cooldown: &TeleportCooldown,
    now: f64,
) -> OverlapResponse {
    if !started {
        // On floor portals the object itself is a sensor while passing, so its overlap end
        // does not mean it left.
        return if frame.is_horizontal() {
            OverlapResponse::Ignore
        } else {
            OverlapResponse::Release
        };
    }
    if !kind.map_or(false, |kind| kind.can_teleport()) {
        return OverlapResponse::Ignore;
    }
    if cooldown.is_cooling(object, now) {
        debug!("{:?} touched a portal while cooling down", object);
        return OverlapResponse::Ignore;
    }
    OverlapResponse::Track
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[derive(Default)]
    struct FakeWorld {
        bodies: HashMap<Entity, TransitBody>,
        passable: HashMap<Entity, bool>,
        writes: usize,
    }

    impl FakeWorld {
        fn with_body(object: Entity, translation: Vec3, linvel: Vec3) -> FakeWorld {
            let mut world = FakeWorld::default();
            world.bodies.insert(
                object,
                TransitBody {
                    translation,
                    rotation: Quat::IDENTITY,
                    linvel,
                    half_height: 0.5,
                    kind: EntityKind::Cube,
                    movable: true,
                },
            );
            world
        }

        fn move_to(&mut self, object: Entity, translation: Vec3) {
            if let Some(body) = self.bodies.get_mut(&object) {
                body.translation = translation;
            }
        }

        fn is_passable(&self, collider: Entity) -> bool {
            self.passable.get(&collider).copied().unwrap_or(false)
        }
    }

    impl TransitWorld for FakeWorld {
        fn body(&self, object: Entity) -> Option<TransitBody> {
            self.bodies.get(&object).copied()
        }

        fn write_body(&mut self, object: Entity, translation: Vec3, rotation: Quat, linvel: Vec3) {
            self.writes += 1;
            if let Some(body) = self.bodies.get_mut(&object) {
                body.translation = translation;
                body.rotation = rotation;
                body.linvel = linvel;
            }
        }

        fn set_passable(&mut self, collider: Entity, passable: bool) {
            self.passable.insert(collider, passable);
        }
    }

    fn object_id() -> Entity {
        Entity::from_raw(1)
    }

    fn surface_id() -> Entity {
        Entity::from_raw(100)
    }

    fn sibling_id() -> Entity {
        Entity::from_raw(200)
    }

    fn wall_portal() -> PortalState {
        let mut state = PortalState::new(PortalFrame::new(Vec3::ZERO, Quat::IDENTITY), Some(surface_id()));
        state.set_destination(Some(sibling_id()));
        state
    }

    fn sibling_frame() -> PortalFrame {
        PortalFrame::facing(Vec3::new(10., 0., 0.), Vec3::NEG_X, Vec3::Y)
    }

    #[test]
    fn crossing_teleports_exactly_once() {
        let mut state = wall_portal();
        let sibling = sibling_frame();
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 0., 1.), Vec3::new(0., 0., -5.));

        assert!(state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.)));
        let report = state.update(Some(&sibling), &mut world);
        assert!(report.teleported.is_empty());
        assert!(state.is_tracking(object_id()));
        assert!(world.is_passable(surface_id()));

        world.move_to(object_id(), Vec3::new(0., 0., -0.5));
        let report = state.update(Some(&sibling), &mut world);
        assert_eq!(report.teleported, vec![object_id()]);
        assert!(!state.is_tracking(object_id()));
        assert!(!world.is_passable(surface_id()));

        let body = world.bodies[&object_id()];
        assert!(body.translation.abs_diff_eq(Vec3::new(9., 0., 0.), 1e-4));
        assert!(body.linvel.abs_diff_eq(Vec3::new(-5., 0., 0.), 1e-4));

        let report = state.update(Some(&sibling), &mut world);
        assert!(report.teleported.is_empty());
        assert_eq!(world.writes, 1);
    }

    #[test]
    fn end_to_end_exit_speed_is_preserved() {
        let mut state = wall_portal();
        let sibling = sibling_frame();
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0.2, 1., 0.8), Vec3::new(0., 0., 5.));
        state.add_to_passing(object_id(), object_id(), Vec3::new(0.2, 1., 0.8));
        state.update(Some(&sibling), &mut world);
        world.move_to(object_id(), Vec3::new(0.2, 1., -0.2));
        state.update(Some(&sibling), &mut world);

        let body = world.bodies[&object_id()];
        assert_relative_eq!(body.linvel.length(), 5., epsilon = 1e-4);
        assert!(body.linvel.cross(sibling.normal).length() < 1e-4);
        // Pushed out in front of the -X face.
        assert!(body.translation.x < 10.);
    }

    #[test]
    fn jumping_past_the_window_is_not_a_crossing() {
        let sibling = sibling_frame();

        let mut state = wall_portal();
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 0., 3.), Vec3::ZERO);
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 3.));
        let report = state.update(Some(&sibling), &mut world);
        assert_eq!(report.dropped, vec![object_id()]);
        assert!(!state.is_tracking(object_id()));

        let mut state = wall_portal();
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 0., 1.), Vec3::ZERO);
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.));
        state.update(Some(&sibling), &mut world);
        world.move_to(object_id(), Vec3::new(0., 0., -3.));
        let report = state.update(Some(&sibling), &mut world);
        assert!(report.teleported.is_empty());
        assert_eq!(report.dropped, vec![object_id()]);
        assert_eq!(world.writes, 0);
    }

    #[test]
    fn static_bodies_are_not_moved() {
        let mut state = wall_portal();
        let sibling = sibling_frame();
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 0., -0.5), Vec3::ZERO);
        if let Some(body) = world.bodies.get_mut(&object_id()) {
            body.movable = false;
        }
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., -0.5));
        let report = state.update(Some(&sibling), &mut world);
        assert!(report.teleported.is_empty());
        assert!(!state.is_tracking(object_id()));
        assert_eq!(world.writes, 0);
    }

    #[test]
    fn vanished_objects_are_dropped() {
        let mut state = wall_portal();
        let sibling = sibling_frame();
        let mut world = FakeWorld::default();
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.));
        let report = state.update(Some(&sibling), &mut world);
        assert_eq!(report.dropped, vec![object_id()]);
        assert_eq!(state.passing_len(), 0);
    }

    #[test]
    fn unlinked_portal_is_inert() {
        let sibling = sibling_frame();
        let mut state =
            PortalState::new(PortalFrame::new(Vec3::ZERO, Quat::IDENTITY), Some(surface_id()));
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 0., -0.5), Vec3::ZERO);
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., -0.5));
        assert_eq!(state.update(Some(&sibling), &mut world), TransitReport::default());
        assert!(state.is_tracking(object_id()));

        let mut state = PortalState::new(PortalFrame::new(Vec3::ZERO, Quat::IDENTITY), None);
        state.set_destination(Some(sibling_id()));
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., -0.5));
        assert_eq!(state.update(Some(&sibling), &mut world), TransitReport::default());
        assert_eq!(state.update(None, &mut world), TransitReport::default());
        assert_eq!(world.writes, 0);
        assert!(world.passable.is_empty());
    }

    #[test]
    fn duplicate_overlaps_are_ignored() {
        let mut state = wall_portal();
        let sibling = sibling_frame();
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 0., 1.), Vec3::ZERO);

        assert!(state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.)));
        assert!(!state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.)));
        assert!(!state.add_to_passing(surface_id(), surface_id(), Vec3::ZERO));

        state.assert_removal(object_id());
        assert!(!state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.)));
        state.update(Some(&sibling), &mut world);
        assert!(!state.is_tracking(object_id()));
        assert!(state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.)));
    }

    #[test]
    fn removal_of_untracked_object_is_a_no_op() {
        let mut state = wall_portal();
        state.assert_removal(object_id());
        assert!(state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.)));
    }

    #[test]
    fn floor_portal_makes_the_object_passable() {
        let floor = PortalFrame::facing(Vec3::ZERO, Vec3::Y, Vec3::NEG_Z);
        let mut state = PortalState::new(floor, Some(surface_id()));
        state.set_destination(Some(sibling_id()));
        let sibling = sibling_frame();
        let collider = Entity::from_raw(2);
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 1., 0.), Vec3::ZERO);

        state.add_to_passing(object_id(), collider, Vec3::new(0., 1., 0.));
        state.update(Some(&sibling), &mut world);
        assert!(world.is_passable(collider));
        assert!(!world.is_passable(surface_id()));

        world.move_to(object_id(), Vec3::new(0., -0.5, 0.));
        let report = state.update(Some(&sibling), &mut world);
        assert_eq!(report.teleported, vec![object_id()]);
        assert!(!world.is_passable(collider));
    }

    #[test]
    fn replacing_returns_toggled_colliders() {
        let mut state = wall_portal();
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.));
        let restore = state.place(PortalFrame::new(Vec3::X, Quat::IDENTITY), Some(sibling_id()));
        assert_eq!(restore, vec![surface_id()]);
        assert_eq!(state.passing_len(), 0);
        assert_eq!(state.surface(), Some(sibling_id()));
        assert!(state.place(PortalFrame::default(), None).is_empty());
    }

    #[test]
    fn anchor_replaces_drifted_position() {
        let mut state = wall_portal();
        let sibling = sibling_frame();
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 1., 1.), Vec3::ZERO);
        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 1., 1.));
        state.update(Some(&sibling), &mut world);
        // Shoved far along the plane while still just behind it.
        world.move_to(object_id(), Vec3::new(0., 5., -0.5));
        state.update(Some(&sibling), &mut world);
        let body = world.bodies[&object_id()];
        assert!(body.translation.abs_diff_eq(Vec3::new(9.5, 1., 0.), 1e-4));
    }

    #[test]
    fn cooldown_expires_after_window() {
        let mut cooldown = TeleportCooldown::new(0.2);
        assert!(!cooldown.is_cooling(object_id(), 1.));
        cooldown.stamp(object_id(), 1.);
        assert!(cooldown.is_cooling(object_id(), 1.1));
        assert!(!cooldown.is_cooling(object_id(), 1.25));
        cooldown.prune(1.1);
        assert!(cooldown.is_cooling(object_id(), 1.1));
        cooldown.prune(1.3);
        assert!(!cooldown.is_cooling(object_id(), 1.1));
    }

    #[test]
    fn teleported_object_is_refused_by_both_portals() {
        let mut state = wall_portal();
        let sibling = sibling_frame();
        let mut cooldown = TeleportCooldown::new(0.2);
        let mut world = FakeWorld::with_body(object_id(), Vec3::new(0., 0., 1.), Vec3::new(0., 0., -5.));

        state.add_to_passing(object_id(), object_id(), Vec3::new(0., 0., 1.));
        state.update(Some(&sibling), &mut world);
        world.move_to(object_id(), Vec3::new(0., 0., -0.5));
        for object in state.update(Some(&sibling), &mut world).teleported {
            cooldown.stamp(object, 1.);
        }

        let kind = Some(EntityKind::Cube);
        for frame in [state.frame(), &sibling] {
            assert_eq!(
                overlap_response(true, object_id(), kind, frame, &cooldown, 1.1),
                OverlapResponse::Ignore
            );
            assert_eq!(
                overlap_response(true, object_id(), kind, frame, &cooldown, 1.25),
                OverlapResponse::Track
            );
        }
    }

    #[test]
    fn only_teleportable_kinds_are_tracked() {
        let frame = PortalFrame::new(Vec3::ZERO, Quat::IDENTITY);
        let cooldown = TeleportCooldown::default();
        let respond = |kind| overlap_response(true, object_id(), kind, &frame, &cooldown, 0.);
        assert_eq!(respond(Some(EntityKind::Player)), OverlapResponse::Track);
        assert_eq!(respond(Some(EntityKind::Cube)), OverlapResponse::Track);
        assert_eq!(respond(Some(EntityKind::Portal)), OverlapResponse::Ignore);
        assert_eq!(respond(Some(EntityKind::Decoration)), OverlapResponse::Ignore);
        assert_eq!(
            respond(Some(EntityKind::Surface {
                holds_portals: true
            })),
            OverlapResponse::Ignore
        );
        assert_eq!(respond(None), OverlapResponse::Ignore);
    }

    #[test]
    fn overlap_end_only_releases_on_wall_portals() {
        let cooldown = TeleportCooldown::default();
        let wall = PortalFrame::new(Vec3::ZERO, Quat::IDENTITY);
        let floor = PortalFrame::facing(Vec3::ZERO, Vec3::Y, Vec3::NEG_Z);
        let kind = Some(EntityKind::Cube);
        assert_eq!(
            overlap_response(false, object_id(), kind, &wall, &cooldown, 0.),
            OverlapResponse::Release
        );
        assert_eq!(
            overlap_response(false, object_id(), kind, &floor, &cooldown, 0.),
            OverlapResponse::Ignore
        );
    }
}
