use funnelpot::routes;
use std::collections::BTreeSet;
use std::fs;
use uuid::Uuid;

fn set(ports: &[u16]) -> BTreeSet<u16> {
    ports.iter().copied().collect()
}

#[test]
fn generated_caddyfile_matches_expected_layout() {
    let rendered = routes::render_caddyfile(&set(&[8080, 8443]), "1.2.3.4", "127.0.0.1:65111");
    let expected = "{\n\tservers {\n\t\tprotocols h1 h2 h2c\n\t}\n}\n\
                    \n1.2.3.4:8443 {\n\ttls internal\n\treverse_proxy 127.0.0.1:65111\n}\n\
                    \n1.2.3.4:8080 {\n\treverse_proxy 127.0.0.1:65111\n}\n";
    assert_eq!(rendered, expected);
}

#[test]
fn rewriting_replaces_the_previous_file() {
    let path = std::env::temp_dir().join(format!("funnelpot_caddyfile_{}", Uuid::new_v4()));

    // First a run with many ports, then a smaller one; the smaller rewrite
    // must fully replace the file, not append to it.
    let wide = routes::render_caddyfile(
        &set(&[80, 443, 8080, 8443, 9000, 9443]),
        "1.2.3.4",
        "127.0.0.1:65111",
    );
    routes::write_caddyfile(&path, &wide).expect("first write");

    let narrow = routes::render_caddyfile(&set(&[8080, 8443]), "1.2.3.4", "127.0.0.1:65111");
    routes::write_caddyfile(&path, &narrow).expect("second write");

    let on_disk = fs::read_to_string(&path).expect("read caddyfile");
    assert_eq!(on_disk, narrow);
    assert_eq!(on_disk.matches("protocols h1 h2 h2c").count(), 1);

    let _ = fs::remove_file(&path);
}

#[test]
fn rerunning_with_same_inputs_is_stable() {
    let free = set(&[80, 443, 8080]);
    let first = routes::render_caddyfile(&free, "198.51.100.7", "127.0.0.1:65111");
    let second = routes::render_caddyfile(&free, "198.51.100.7", "127.0.0.1:65111");
    assert_eq!(first, second);
}
