use bevy::{
    prelude::*,
    reflect::FromReflect,
    render::{
        camera::{Projection, RenderTarget},
        render_resource::{
            Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
        },
        view::RenderLayers,
    },
    transform::TransformSystem,
    window::WindowResized,
};
use bevy_rapier3d::prelude::*;
use leafwing_input_manager::prelude::*;
use serde::Deserialize;

pub mod camera_projection;
pub mod geometry;
pub mod material;
pub mod placement;
pub mod render;
pub mod teleport;
pub mod transit;

use camera_projection::PortalCameraProjection;
use material::PortalMaterial;
use placement::{PlacementRequest, PortalPlacer};
use render::{clip_plane, destination_view, view_space_plane};
use teleport::PortalFrame;
use transit::{
    overlap_response, OverlapResponse, PortalState, TeleportCooldown, TransitBody, TransitWorld,
};

use super::{first_person_controller::*, input::Actions, physics::*};

/// Render layer holding the portal quads, only seen by the player camera.
pub const PORTAL_RENDER_LAYER: u8 = 1;

#[derive(Debug)]
pub struct PortalPlugin;

#[derive(Debug, Clone, Resource, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub half_width: f32,
    pub half_height: f32,
    /// How far a portal shot travels.
    pub max_cast_distance: f32,
    /// Seconds during which a teleported object cannot enter another portal.
    pub cooldown: f64,
    pub surface_offset: f32,
    /// Size of the portal views while the window has none to offer.
    pub render_target_size: [u32; 2],
}

impl Default for PortalSettings {
    fn default() -> Self {
        PortalSettings {
            half_width: 1.78,
            half_height: 2.62,
            max_cast_distance: 100.,
            cooldown: 0.2,
            surface_offset: 0.02,
            render_target_size: [1280, 720],
        }
    }
}

impl PortalSettings {
    pub fn placer(&self) -> PortalPlacer {
        PortalPlacer {
            half_extents: Vec2::new(self.half_width, self.half_height),
            surface_offset: self.surface_offset,
        }
    }
}

#[derive(Debug, Resource)]
struct PortalResources {
    render_targets: [Handle<Image>; 2],
    materials: [Handle<PortalMaterial>; 2],
    mesh: Handle<Mesh>,
}

#[derive(Debug, Component)]
pub struct Portal<const N: u32> {
    /// The camera rendering the view through this portal. It sits behind the other portal, with
    /// the same relative position as the player has to this one.
    camera: Option<Entity>,
    state: PortalState,
}

impl<const N: u32> Portal<N> {
    pub fn fire_action() -> Actions {
        match N {
            0 => Actions::FirePortalA,
            _ => Actions::FirePortalB,
        }
    }

    pub fn state(&self) -> &PortalState {
        &self.state
    }
}

#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct PortalCamera<const N: u32>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, SystemLabel)]
pub enum PortalLabels {
    ShootPortals,
    QueuePassengers,
    Transit,
    CreateCameras,
    SyncCameras,
}

#[derive(Bundle)]
pub struct PortalBundle<const N: u32> {
    #[bundle]
    mesh_bundle: MaterialMeshBundle<PortalMaterial>,
    render_layers: RenderLayers,
    portal: Portal<N>,
    kind: EntityKind,
    collider: Collider,
    active_events: ActiveEvents,
    sensor: Sensor,
    collision_groups: CollisionGroups,
    name: Name,
}

impl<const N: u32> PortalBundle<N> {
    fn new(state: PortalState, settings: &PortalSettings, res: &PortalResources) -> Self {
        PortalBundle {
            mesh_bundle: MaterialMeshBundle {
                mesh: res.mesh.clone(),
                material: res.materials[N as usize].clone(),
                transform: state.frame().transform(),
                // Shown once linked.
                visibility: Visibility { is_visible: false },
                ..default()
            },
            render_layers: RenderLayers::layer(PORTAL_RENDER_LAYER),
            portal: Portal { camera: None, state },
            kind: EntityKind::Portal,
            collider: Collider::cuboid(settings.half_width, settings.half_height, 0.6),
            active_events: ActiveEvents::COLLISION_EVENTS,
            sensor: Sensor,
            collision_groups: CollisionGroups::new(PORTAL_GROUP, PLAYER_GROUP | PROPS_GROUP),
            name: Name::new(format!("Portal {N}")),
        }
    }
}

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(MaterialPlugin::<PortalMaterial>::default())
            .init_resource::<PortalSettings>()
            .register_type::<PortalCamera<0>>()
            .register_type::<PortalCamera<1>>()
            .register_type::<PortalCameraProjection>()
            .add_plugin(bevy::render::camera::CameraProjectionPlugin::<
                PortalCameraProjection,
            >::default())
            .add_startup_system(load_portal_assets)
            .add_system(resize_portal_targets)
            .add_system_set(
                SystemSet::new()
                    .label(PortalLabels::ShootPortals)
                    .with_system(fire_portal::<0, 1>)
                    .with_system(fire_portal::<1, 0>),
            )
            .add_system_set(
                SystemSet::new()
                    .label(PortalLabels::QueuePassengers)
                    .after(PortalLabels::ShootPortals)
                    .with_system(queue_portal_passengers::<0>)
                    .with_system(queue_portal_passengers::<1>),
            )
            .add_system(
                update_portal_transit::<0, 1>
                    .label(PortalLabels::Transit)
                    .after(PortalLabels::QueuePassengers),
            )
            .add_system(
                update_portal_transit::<1, 0>
                    .label(PortalLabels::Transit)
                    .after(PortalLabels::QueuePassengers)
                    .after(update_portal_transit::<0, 1>),
            )
            .add_system(expire_cooldowns.after(PortalLabels::Transit))
            .add_system_set(
                SystemSet::new()
                    .label(PortalLabels::CreateCameras)
                    .after(PortalLabels::ShootPortals)
                    .with_system(create_portal_cameras::<0>)
                    .with_system(create_portal_cameras::<1>),
            )
            .add_system_set(
                SystemSet::new()
                    .label(PortalLabels::SyncCameras)
                    .after(PortalLabels::CreateCameras)
                    .after(PortalLabels::Transit)
                    .with_system(sync_portal_camera::<0, 1>)
                    .with_system(sync_portal_camera::<1, 0>),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                bevy::render::view::update_frusta::<PortalCameraProjection>
                    .after(TransformSystem::TransformPropagate),
            );
    }
}

/// Load the assets required to render the portals.
fn load_portal_assets(
    mut commands: Commands,
    settings: Res<PortalSettings>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<PortalMaterial>>,
    mut images: ResMut<Assets<Image>>,
    windows: Res<Windows>,
) {
    let portal_mesh = meshes.add(
        shape::Quad {
            size: Vec2::new(settings.half_width * 2., settings.half_height * 2.),
            flip: false,
        }
        .into(),
    );

    let tex_size = render_target_extent(
        windows
            .get_primary()
            .map(|window| [window.physical_width(), window.physical_height()]),
        settings.render_target_size,
    );
    let mut render_targets: [Handle<Image>; 2] = default();
    let mut portal_materials: [Handle<PortalMaterial>; 2] = default();
    for i in 0..2 {
        let mut image = Image {
            texture_descriptor: TextureDescriptor {
                label: None,
                size: tex_size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::Bgra8UnormSrgb,
                usage: TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_DST
                    | TextureUsages::RENDER_ATTACHMENT,
            },
            ..default()
        };
        image.resize(tex_size);
        render_targets[i] = images.add(image);
        portal_materials[i] = materials.add(PortalMaterial {
            texture: render_targets[i].clone(),
        });
    }

    commands.insert_resource(TeleportCooldown::new(settings.cooldown));
    commands.insert_resource(PortalResources {
        render_targets,
        materials: portal_materials,
        mesh: portal_mesh,
    });
}

/// Portal views are sampled in screen space, so their targets follow the window size. Falls back
/// to `fallback` while there is no usable window, e.g. when minimized.
fn render_target_extent(window: Option<[u32; 2]>, fallback: [u32; 2]) -> Extent3d {
    let [width, height] = window
        .filter(|[width, height]| *width > 0 && *height > 0)
        .unwrap_or(fallback);
    Extent3d {
        width,
        height,
        ..default()
    }
}

fn resize_portal_targets(
    mut resized: EventReader<WindowResized>,
    windows: Res<Windows>,
    settings: Res<PortalSettings>,
    portal_res: Option<Res<PortalResources>>,
    mut images: ResMut<Assets<Image>>,
) {
    let primary = windows.get_primary();
    // Drain every event, only the last size matters.
    let primary_resized = resized
        .iter()
        .filter(|event| primary.map_or(false, |window| window.id() == event.id))
        .count()
        > 0;
    if !primary_resized {
        return;
    }
    let Some(portal_res) = portal_res else {
        return;
    };
    let size = render_target_extent(
        primary.map(|window| [window.physical_width(), window.physical_height()]),
        settings.render_target_size,
    );
    for target in &portal_res.render_targets {
        if let Some(image) = images.get_mut(target) {
            if image.texture_descriptor.size != size {
                debug!("Resizing portal render target to {}x{}", size.width, size.height);
                image.resize(size);
            }
        }
    }
}

/// On left click/right click, shoot a portal.
#[allow(clippy::too_many_arguments)]
fn fire_portal<const N: u32, const OTHER: u32>(
    mut commands: Commands,
    player_query: Query<&ActionState<Actions>, With<FirstPersonController>>,
    camera_query: Query<&GlobalTransform, With<FirstPersonCamera>>,
    mut portal_query: Query<(Entity, &mut Portal<N>, &mut Transform)>,
    mut other_query: Query<(Entity, &mut Portal<OTHER>)>,
    surfaces: Query<(&EntityKind, &SurfaceBounds, &GlobalTransform)>,
    rapier: Res<RapierContext>,
    settings: Res<PortalSettings>,
    portal_res: Option<Res<PortalResources>>,
) {
    let (Ok(actions), Ok(camera), Some(portal_res)) =
        (player_query.get_single(), camera_query.get_single(), portal_res)
    else {
        return;
    };
    if !actions.just_pressed(Portal::<N>::fire_action()) {
        return;
    }
    info!("Shooting portal {}", N);

    let origin = camera.translation();
    let filter = portal_shot_filter();
    let Some((surface, impact)) = rapier.cast_ray_and_get_normal(
        origin,
        camera.forward(),
        settings.max_cast_distance,
        true,
        filter,
    ) else {
        debug!("Portal {} shot hit nothing", N);
        return;
    };
    let Ok((kind, bounds, surface_transform)) = surfaces.get(surface) else {
        debug!("Portal {} shot hit {:?}, which is not a surface", N, surface);
        return;
    };
    if !kind.can_hold_portal() {
        info!("Portal {} shot hit {:?}, which cannot hold portals", N, surface);
        return;
    }

    let (surface_min, surface_max) = bounds.world_aabb(surface_transform);
    let request = PlacementRequest {
        hit_point: impact.point,
        surface_normal: impact.normal,
        viewer: origin,
        surface_min,
        surface_max,
    };
    let other = other_query
        .get_single()
        .ok()
        .map(|(entity, other)| (entity, *other.state.frame()));
    let frame = match settings
        .placer()
        .place(&request, other.as_ref().map(|(_, frame)| frame))
    {
        Ok(frame) => frame,
        Err(err) => {
            info!("Portal {} not placed: {}", N, err);
            return;
        }
    };
    let backing = backing_surface(&rapier, &frame, filter);
    info!(
        "Placing portal {} at {} facing {}, backed by {:?}",
        N, frame.translation, frame.normal, backing
    );

    let other_entity = other.map(|(entity, _)| entity);
    let portal_entity = match portal_query.get_single_mut() {
        Ok((entity, mut portal, mut transform)) => {
            for collider in portal.state.place(frame, backing) {
                if let Some(mut entity_commands) = commands.get_entity(collider) {
                    entity_commands.remove::<Sensor>();
                }
            }
            portal.state.set_destination(other_entity);
            *transform = frame.transform();
            entity
        }
        Err(_) => {
            let mut state = PortalState::new(frame, backing);
            state.set_destination(other_entity);
            commands
                .spawn(PortalBundle::<N>::new(state, &settings, &portal_res))
                .id()
        }
    };

    if let Ok((other_entity, mut other)) = other_query.get_single_mut() {
        if other.state.destination() != Some(portal_entity) {
            info!("Linking portals {:?} and {:?}", portal_entity, other_entity);
            other.state.set_destination(Some(portal_entity));
        }
    }
}

/// Portal shots only stop on static level geometry.
fn portal_shot_filter() -> QueryFilter<'static> {
    QueryFilter {
        groups: Some(InteractionGroups::new(
            RAYCAST_GROUP,
            WALLS_GROUP | GROUND_GROUP,
        )),
        ..QueryFilter::only_fixed().exclude_sensors()
    }
}

/// The solid object right behind a freshly placed portal.
fn backing_surface(
    rapier: &RapierContext,
    frame: &PortalFrame,
    filter: QueryFilter,
) -> Option<Entity> {
    rapier
        .cast_ray(frame.translation, -frame.normal, 1., true, filter)
        .map(|(entity, _toi)| entity)
}

/// Start tracking teleportable bodies entering a portal's sensor.
fn queue_portal_passengers<const N: u32>(
    mut collisions: EventReader<CollisionEvent>,
    mut portal_query: Query<(Entity, &mut Portal<N>)>,
    bodies: Query<(&EntityKind, &GlobalTransform), With<Teleportable>>,
    parents: Query<&Parent>,
    cooldown: Res<TeleportCooldown>,
    time: Res<Time>,
) {
    let Ok((portal_entity, mut portal)) = portal_query.get_single_mut() else {
        return;
    };
    let now = time.elapsed_seconds_f64();
    for collision in collisions.iter() {
        let (collider_a, collider_b, started) = match collision {
            CollisionEvent::Started(a, b, _flags) => (*a, *b, true),
            CollisionEvent::Stopped(a, b, _flags) => (*a, *b, false),
        };
        let collider = if collider_a == portal_entity {
            collider_b
        } else if collider_b == portal_entity {
            collider_a
        } else {
            continue;
        };
        let object = owning_body(
            collider,
            |entity| bodies.contains(entity),
            |entity| parents.get(entity).ok().map(|parent| parent.get()),
        );
        let body = bodies.get(object).ok();

        match overlap_response(
            started,
            object,
            body.map(|(kind, _)| *kind),
            portal.state.frame(),
            &cooldown,
            now,
        ) {
            OverlapResponse::Track => {
                let Some((_, transform)) = body else {
                    continue;
                };
                if portal
                    .state
                    .add_to_passing(object, collider, transform.translation())
                {
                    debug!("{:?} entering portal {}", object, N);
                }
            }
            OverlapResponse::Release => portal.state.assert_removal(object),
            OverlapResponse::Ignore => {}
        }
    }
}

/// The body a collider belongs to. Compound bodies carry their colliders on child entities.
fn owning_body(
    collider: Entity,
    is_body: impl Fn(Entity) -> bool,
    parent_of: impl Fn(Entity) -> Option<Entity>,
) -> Entity {
    if is_body(collider) {
        collider
    } else {
        parent_of(collider).unwrap_or(collider)
    }
}

type TransitBodyQuery<'w, 's> = Query<
    'w,
    's,
    (
        &'static EntityKind,
        &'static Teleportable,
        &'static mut Transform,
        Option<&'static mut Velocity>,
        Option<&'static RigidBody>,
    ),
>;

/// Teleportable bodies as seen by a portal during its update. Collider changes are collected and
/// applied through commands afterwards.
struct RapierTransit<'a, 'w, 's> {
    bodies: &'a mut TransitBodyQuery<'w, 's>,
    toggles: Vec<(Entity, bool)>,
}

impl TransitWorld for RapierTransit<'_, '_, '_> {
    fn body(&self, object: Entity) -> Option<TransitBody> {
        let (kind, teleportable, transform, velocity, rigid_body) = self.bodies.get(object).ok()?;
        Some(TransitBody {
            translation: transform.translation,
            rotation: transform.rotation,
            linvel: velocity.map_or(Vec3::ZERO, |velocity| velocity.linvel),
            half_height: teleportable.half_extents.y,
            kind: *kind,
            movable: matches!(
                rigid_body,
                Some(
                    RigidBody::Dynamic
                        | RigidBody::KinematicPositionBased
                        | RigidBody::KinematicVelocityBased
                )
            ),
        })
    }

    fn write_body(&mut self, object: Entity, translation: Vec3, rotation: Quat, linvel: Vec3) {
        if let Ok((_, _, mut transform, velocity, _)) = self.bodies.get_mut(object) {
            transform.translation = translation;
            transform.rotation = rotation;
            if let Some(mut velocity) = velocity {
                velocity.linvel = linvel;
            }
        }
    }

    fn set_passable(&mut self, collider: Entity, passable: bool) {
        self.toggles.retain(|(entity, _)| *entity != collider);
        self.toggles.push((collider, passable));
    }
}

fn update_portal_transit<const N: u32, const OTHER: u32>(
    mut commands: Commands,
    mut portal_query: Query<&mut Portal<N>>,
    other_query: Query<&Portal<OTHER>>,
    mut bodies: TransitBodyQuery,
    mut cooldown: ResMut<TeleportCooldown>,
    time: Res<Time>,
) {
    let Ok(mut portal) = portal_query.get_single_mut() else {
        return;
    };
    let destination = other_query
        .get_single()
        .ok()
        .map(|other| *other.state.frame());

    let mut world = RapierTransit {
        bodies: &mut bodies,
        toggles: Vec::new(),
    };
    let report = portal.state.update(destination.as_ref(), &mut world);

    for (collider, passable) in world.toggles {
        if let Some(mut entity_commands) = commands.get_entity(collider) {
            if passable {
                entity_commands.insert(Sensor);
            } else {
                entity_commands.remove::<Sensor>();
            }
        }
    }
    let now = time.elapsed_seconds_f64();
    for object in report.teleported {
        cooldown.stamp(object, now);
    }
}

fn expire_cooldowns(mut cooldown: ResMut<TeleportCooldown>, time: Res<Time>) {
    cooldown.prune(time.elapsed_seconds_f64());
}

fn create_portal_cameras<const N: u32>(
    mut commands: Commands,
    mut portal_query: Query<&mut Portal<N>>,
    portal_res: Option<Res<PortalResources>>,
) {
    let Some(portal_res) = portal_res else {
        return;
    };
    for mut portal in &mut portal_query {
        if portal.camera.is_some() {
            continue;
        }
        let camera = commands
            .spawn((
                Camera3dBundle {
                    camera: Camera {
                        // Render before the main camera.
                        priority: -1 - N as isize,
                        target: RenderTarget::Image(
                            portal_res.render_targets[N as usize].clone(),
                        ),
                        is_active: false,
                        ..default()
                    },
                    ..default()
                },
                PortalCameraProjection::default(),
                PortalCamera::<N>,
                // Everything but the portals themselves.
                RenderLayers::layer(0),
                Name::new(format!("Portal {N} camera")),
            ))
            .remove::<Projection>()
            .id();
        debug!("Created camera {:?} for portal {}", camera, N);
        portal.camera = Some(camera);
    }
}

/// Stand the virtual camera of portal `N` behind portal `OTHER`, and only show the portal while
/// it leads somewhere.
fn sync_portal_camera<const N: u32, const OTHER: u32>(
    main_camera_query: Query<(&GlobalTransform, &Projection), With<FirstPersonCamera>>,
    mut portal_query: Query<(&Portal<N>, &mut Visibility)>,
    other_query: Query<&Portal<OTHER>>,
    mut camera_query: Query<
        (&mut Camera, &mut Transform, &mut PortalCameraProjection),
        With<PortalCamera<N>>,
    >,
) {
    let Ok((portal, mut visibility)) = portal_query.get_single_mut() else {
        return;
    };
    let sibling = other_query
        .get_single()
        .ok()
        .filter(|other| portal.state.destination().is_some() && other.state.destination().is_some());
    visibility.is_visible = sibling.is_some();

    let Some(Ok((mut camera, mut transform, mut projection))) =
        portal.camera.map(|camera| camera_query.get_mut(camera))
    else {
        return;
    };
    camera.is_active = sibling.is_some();

    let (Some(sibling), Ok((main_camera, main_projection))) = (sibling, main_camera_query.get_single())
    else {
        return;
    };
    let view = main_camera.compute_matrix().inverse();
    let through = destination_view(view, portal.state.frame(), sibling.state.frame());
    *transform = Transform::from_matrix(through.inverse());

    let plane = view_space_plane(through, clip_plane(sibling.state.frame()));
    projection.clip_plane = plane / plane.truncate().length();
    if let Projection::Perspective(perspective) = main_projection {
        projection.fov = perspective.fov;
        projection.aspect_ratio = perspective.aspect_ratio;
        projection.near = perspective.near;
        projection.far = perspective.far;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliders_resolve_to_their_body() {
        let body = Entity::from_raw(1);
        let child = Entity::from_raw(2);
        let loose = Entity::from_raw(3);
        let is_body = |entity| entity == body;
        let parent_of = |entity| (entity == child).then_some(body);
        assert_eq!(owning_body(body, is_body, parent_of), body);
        assert_eq!(owning_body(child, is_body, parent_of), body);
        assert_eq!(owning_body(loose, is_body, parent_of), loose);
    }

    #[test]
    fn portal_shots_only_hit_level_geometry() {
        let groups = portal_shot_filter().groups.unwrap();
        assert_eq!(groups.memberships, RAYCAST_GROUP);
        assert!(groups.filter.contains(WALLS_GROUP | GROUND_GROUP));
        assert!(!groups.filter.intersects(PROPS_GROUP | PLAYER_GROUP | PORTAL_GROUP));
    }

    #[test]
    fn render_targets_follow_the_window() {
        let size = render_target_extent(Some([1920, 800]), [1280, 720]);
        assert_eq!((size.width, size.height), (1920, 800));
        let size = render_target_extent(Some([0, 0]), [1280, 720]);
        assert_eq!((size.width, size.height), (1280, 720));
        let size = render_target_extent(None, [1280, 720]);
        assert_eq!((size.width, size.height), (1280, 720));
    }
}
