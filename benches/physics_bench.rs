//! Benchmarks for ALICE-Physics2D
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use alice_physics2d::prelude::*;

// ============================================================================
// Scene builders
// ============================================================================

fn ground(world: &mut World) {
    let body = world.create_body(&BodyDef::default()).unwrap();
    let slab = Shape::Polygon(PolygonShape::new_box(100.0, 1.0).unwrap());
    world.create_fixture(body, &FixtureDef::new(slab)).unwrap();
}

fn box_pile(count: usize) -> World {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    ground(&mut world);
    for i in 0..count {
        let x = (i % 10) as f32 * 1.1 - 5.0;
        let y = 2.0 + (i / 10) as f32 * 1.1;
        let body = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(x, y),
                ..BodyDef::default()
            })
            .unwrap();
        let mut def = FixtureDef::new(Shape::Polygon(PolygonShape::new_box(0.5, 0.5).unwrap()));
        def.density = 1.0;
        def.friction = 0.5;
        world.create_fixture(body, &def).unwrap();
    }
    world
}

// ============================================================================
// Step benchmarks
// ============================================================================

fn bench_world_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");

    for &count in &[10usize, 100, 500] {
        group.bench_function(format!("{count}_boxes"), |b| {
            // Settle first so the benchmark measures steady-state solving
            let mut world = box_pile(count);
            for _ in 0..60 {
                world.step(1.0 / 60.0, 8, 3).unwrap();
            }
            b.iter(|| {
                world.step(black_box(1.0 / 60.0), 8, 3).unwrap();
                world.profile().contacts
            });
        });
    }

    group.finish();
}

fn bench_particles(c: &mut Criterion) {
    let mut group = c.benchmark_group("particles");

    group.bench_function("pool_step", |b| {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        let basin = world.create_body(&BodyDef::default()).unwrap();
        let walls = Shape::Chain(
            ChainShape::new_chain(&[
                Vec2::new(-10.0, 10.0),
                Vec2::new(-10.0, 0.0),
                Vec2::new(10.0, 0.0),
                Vec2::new(10.0, 10.0),
            ])
            .unwrap(),
        );
        world.create_fixture(basin, &FixtureDef::new(walls)).unwrap();
        let mut def =
            ParticleGroupDef::new(Shape::Polygon(PolygonShape::new_box(6.0, 4.0).unwrap()));
        def.position = Vec2::new(0.0, 5.0);
        world.particles_mut().create_particle_group(&def);
        b.iter(|| {
            world.step(black_box(1.0 / 60.0), 8, 3).unwrap();
            world.particles().particle_count()
        });
    });

    group.finish();
}

// ============================================================================
// Query benchmarks
// ============================================================================

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");

    let mut world = box_pile(200);
    for _ in 0..60 {
        world.step(1.0 / 60.0, 8, 3).unwrap();
    }

    group.bench_function("aabb_query_200_boxes", |b| {
        let region = Aabb::new(Vec2::new(-3.0, 0.0), Vec2::new(3.0, 6.0));
        b.iter(|| {
            let mut hits = 0usize;
            world.query_aabb(black_box(&region), |_| {
                hits += 1;
                true
            });
            hits
        });
    });

    group.bench_function("ray_cast_200_boxes", |b| {
        b.iter(|| {
            let mut closest = 1.0f32;
            world.ray_cast(
                black_box(Vec2::new(-20.0, 3.0)),
                black_box(Vec2::new(20.0, 3.0)),
                |_, _, _, fraction| {
                    closest = fraction;
                    fraction
                },
            );
            closest
        });
    });

    group.finish();
}

criterion_group!(benches, bench_world_step, bench_particles, bench_queries);
criterion_main!(benches);
