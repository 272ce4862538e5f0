use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::plugins::physics::*;

const WALL_THICKNESS: f32 = 1.;
const CUBE_HALF_SIZE: f32 = 0.4;

/// Setup a test room in a square flat arena format of specified size.
/// 4 walls, a floor and a ceiling, all able to hold portals.
pub fn make_test_arena(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
    length: f32,
    height: f32,
) {
    let walls_materials = [
        materials.add(StandardMaterial::from(Color::RED)),
        materials.add(StandardMaterial::from(Color::GREEN)),
        materials.add(StandardMaterial::from(Color::BLUE)),
        materials.add(StandardMaterial::from(Color::ANTIQUE_WHITE)),
    ];
    let ground_material = materials.add(StandardMaterial::from(Color::DARK_GRAY));

    let half_len = length / 2.;
    let wall_half_extents = Vec3::new(half_len, height / 2., WALL_THICKNESS / 2.);
    let ground_half_extents = Vec3::new(half_len * 1.1, WALL_THICKNESS / 2., half_len * 1.1);
    let wall_mesh = meshes.add(shape::Box::new(length, height, WALL_THICKNESS).into());
    let ground_mesh = meshes.add(
        shape::Box::new(
            ground_half_extents.x * 2.,
            WALL_THICKNESS,
            ground_half_extents.z * 2.,
        )
        .into(),
    );

    let portal_surface = EntityKind::Surface {
        holds_portals: true,
    };

    let mut ground = commands.spawn(PbrBundle {
        mesh: ground_mesh.clone(),
        material: ground_material.clone(),
        transform: Transform::from_xyz(0., -WALL_THICKNESS / 2., 0.),
        ..default()
    });
    ground.insert((
        Name::from("Ground"),
        RigidBody::Fixed,
        Collider::cuboid(
            ground_half_extents.x,
            ground_half_extents.y,
            ground_half_extents.z,
        ),
        CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
        portal_surface,
        SurfaceBounds {
            half_extents: ground_half_extents,
        },
    ));

    ground.with_children(|parent| {
        for (i, mat) in walls_materials.into_iter().enumerate() {
            // Relative to the ground, whose top is at 0.5.
            let mut transform = Transform::from_xyz(
                0.,
                WALL_THICKNESS / 2. + height / 2.,
                -(half_len + WALL_THICKNESS / 2.),
            );
            transform.rotate_around(
                Vec3::ZERO,
                Quat::from_axis_angle(Vec3::Y, i as f32 * FRAC_PI_2),
            );
            parent
                .spawn(PbrBundle {
                    mesh: wall_mesh.clone(),
                    material: mat,
                    transform,
                    ..default()
                })
                .insert((
                    Name::from(format!("Wall_{}", i)),
                    RigidBody::Fixed,
                    Collider::cuboid(
                        wall_half_extents.x,
                        wall_half_extents.y,
                        wall_half_extents.z,
                    ),
                    CollisionGroups::new(WALLS_GROUP, ALL_GROUPS),
                    portal_surface,
                    SurfaceBounds {
                        half_extents: wall_half_extents,
                    },
                ));
        }
        parent
            .spawn(PbrBundle {
                mesh: ground_mesh,
                material: ground_material,
                transform: Transform::from_translation(Vec3::Y * (height + WALL_THICKNESS)),
                ..default()
            })
            .insert((
                Name::from("Ceiling"),
                RigidBody::Fixed,
                Collider::cuboid(
                    ground_half_extents.x,
                    ground_half_extents.y,
                    ground_half_extents.z,
                ),
                CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
                portal_surface,
                SurfaceBounds {
                    half_extents: ground_half_extents,
                },
            ));
    });
}

/// A few cubes to throw through portals, and a pillar portals do not stick to.
pub fn spawn_props(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
) {
    let cube_mesh = meshes.add(shape::Cube::new(CUBE_HALF_SIZE * 2.).into());
    let cube_material = materials.add(StandardMaterial::from(Color::ORANGE));
    for i in 0..3 {
        commands
            .spawn(PbrBundle {
                mesh: cube_mesh.clone(),
                material: cube_material.clone(),
                transform: Transform::from_xyz(-3. + 3. * i as f32, 2., -4.),
                ..default()
            })
            .insert((
                Name::from(format!("Cube_{}", i)),
                RigidBody::Dynamic,
                Collider::cuboid(CUBE_HALF_SIZE, CUBE_HALF_SIZE, CUBE_HALF_SIZE),
                Velocity::default(),
                CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
                EntityKind::Cube,
                Teleportable {
                    half_extents: Vec3::splat(CUBE_HALF_SIZE),
                },
            ));
    }

    let pillar_half_extents = Vec3::new(1., 4., 1.);
    commands
        .spawn(PbrBundle {
            mesh: meshes.add(
                shape::Box::new(
                    pillar_half_extents.x * 2.,
                    pillar_half_extents.y * 2.,
                    pillar_half_extents.z * 2.,
                )
                .into(),
            ),
            material: materials.add(StandardMaterial {
                base_color: Color::rgba(0.7, 0.8, 1., 0.6),
                alpha_mode: AlphaMode::Blend,
                ..default()
            }),
            transform: Transform::from_xyz(6., pillar_half_extents.y, 6.),
            ..default()
        })
        .insert((
            Name::from("Glass pillar"),
            RigidBody::Fixed,
            Collider::cuboid(
                pillar_half_extents.x,
                pillar_half_extents.y,
                pillar_half_extents.z,
            ),
            CollisionGroups::new(WALLS_GROUP, ALL_GROUPS),
            EntityKind::Surface {
                holds_portals: false,
            },
            SurfaceBounds {
                half_extents: pillar_half_extents,
            },
        ));
}
