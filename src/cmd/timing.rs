use storyreel::scene::Scene;
use storyreel::timing::allocate_for_scenes;

pub fn cmd_timing(total_ms: u64, min_ms: u64, texts: &[String]) {
    let scenes: Vec<Scene> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Scene::new(i, text.as_str()))
        .collect();

    for ms in allocate_for_scenes(&scenes, total_ms, min_ms) {
        println!("{ms}");
    }
}
