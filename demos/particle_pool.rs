//! Pour a block of fluid particles into a basin and watch it level out.
//!
//! Run with: `cargo run --example particle_pool`

use alice_physics2d::prelude::*;

fn main() {
    let mut world = World::new(Vec2::new(0.0, -10.0));

    let basin = world.create_body(&BodyDef::default()).unwrap();
    let walls = Shape::Chain(
        ChainShape::new_chain(&[
            Vec2::new(-8.0, 12.0),
            Vec2::new(-8.0, 0.0),
            Vec2::new(8.0, 0.0),
            Vec2::new(8.0, 12.0),
        ])
        .unwrap(),
    );
    world
        .create_fixture(basin, &FixtureDef::new(walls))
        .unwrap();

    let mut def = ParticleGroupDef::new(Shape::Polygon(PolygonShape::new_box(3.0, 3.0).unwrap()));
    def.position = Vec2::new(-3.0, 8.0);
    def.flags = ParticleFlags::TENSILE | ParticleFlags::VISCOUS;
    world.particles_mut().create_particle_group(&def);
    println!("poured {} particles", world.particles().particle_count());

    for frame in 0..360 {
        let profile = world.step(1.0 / 60.0, 8, 3).unwrap();
        if frame % 90 == 0 {
            let positions = world.particles().position_buffer();
            let surface = positions.iter().map(|p| p.y).fold(0.0f32, f32::max);
            let spread = positions.iter().map(|p| p.x.abs()).fold(0.0f32, f32::max);
            println!(
                "t = {:5.2}s  surface y = {:5.2}  spread x = {:5.2}  particle pass = {:.3} ms",
                frame as f32 / 60.0,
                surface,
                spread,
                profile.particle_ms
            );
        }
    }
}
