//! Drop a pyramid of boxes onto the ground and print the settled pile.
//!
//! Run with: `cargo run --example falling_boxes`

use alice_physics2d::prelude::*;

fn main() {
    let mut world = World::new(Vec2::new(0.0, -10.0));

    let ground = world.create_body(&BodyDef::default()).unwrap();
    let slab = Shape::Polygon(PolygonShape::new_box(50.0, 1.0).unwrap());
    world
        .create_fixture(ground, &FixtureDef::new(slab))
        .unwrap();

    let mut boxes = Vec::new();
    for row in 0..6 {
        for col in 0..(6 - row) {
            let x = col as f32 - (6 - row) as f32 * 0.5 + 0.5;
            let y = 2.0 + row as f32 * 1.2;
            let body = world
                .create_body(&BodyDef {
                    body_type: BodyType::Dynamic,
                    position: Vec2::new(x, y),
                    ..BodyDef::default()
                })
                .unwrap();
            let mut def =
                FixtureDef::new(Shape::Polygon(PolygonShape::new_box(0.5, 0.5).unwrap()));
            def.density = 1.0;
            def.friction = 0.5;
            world.create_fixture(body, &def).unwrap();
            boxes.push(body);
        }
    }

    for frame in 0..240 {
        let profile = world.step(1.0 / 60.0, 8, 3).unwrap();
        if frame % 60 == 0 {
            println!(
                "t = {:5.2}s  islands = {}  contacts = {}  step = {:.3} ms",
                frame as f32 / 60.0,
                profile.islands,
                profile.contacts,
                profile.step_ms
            );
        }
    }

    println!("\nsettled pile:");
    for &body in &boxes {
        let b = world.body(body).unwrap();
        let p = b.position();
        println!(
            "  box at ({:6.2}, {:5.2})  angle {:6.3}  {}",
            p.x,
            p.y,
            b.angle(),
            if b.is_awake() { "awake" } else { "asleep" }
        );
    }
}
