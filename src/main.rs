use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use shade_bridge::translator::Translator;
use shade_bridge::{ProceduralEval, TranslatedArtifact, TranslationSession, target, xml_loader};

#[derive(Debug, Default, Clone)]
struct Cli {
    graph_xml: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    bake_size: Option<u32>,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--graph" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --graph"));
                };
                cli.graph_xml = Some(PathBuf::from(v));
                i += 2;
            }
            "--outputdir" | "--output-dir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --outputdir"));
                };
                cli.output_dir = Some(PathBuf::from(v));
                i += 2;
            }
            "--bake-size" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --bake-size"));
                };
                let size: u32 = v
                    .parse()
                    .map_err(|e| anyhow!("invalid --bake-size {v}: {e}"))?;
                cli.bake_size = Some(size);
                i += 2;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --graph <graph.xml>, --outputdir <dir>, --bake-size <px>)"
                ));
            }
        }
    }
    Ok(cli)
}

/// Filesystem-safe artifact name for a root node.
fn artifact_stem(name: &str, index: usize) -> String {
    if name.is_empty() {
        return format!("root{index}");
    }
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn run(cli: Cli) -> Result<()> {
    let graph_path = cli
        .graph_xml
        .ok_or_else(|| anyhow!("--graph <graph.xml> is required"))?;
    let output_dir = cli.output_dir.unwrap_or_else(|| {
        graph_path
            .parent()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let loaded = xml_loader::load_graph_from_path(&graph_path)?;
    if loaded.roots.is_empty() {
        return Err(anyhow!("no root nodes in {}", graph_path.display()));
    }

    let host = ProceduralEval;
    let mut session = TranslationSession::new();
    session.begin_sync();
    let mut translator = Translator::new(&mut session, &host);
    if let Some(size) = cli.bake_size {
        translator.bake_size = (size, size);
    }

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    for (i, root) in loaded.roots.iter().enumerate() {
        let translated = translator.translate_material(root)?;
        let stem = artifact_stem(&root.name, i);

        let description = target::describe(&translated.artifact);
        let json_path = output_dir.join(format!("{stem}.json"));
        std::fs::write(&json_path, serde_json::to_string_pretty(&description)?)
            .with_context(|| format!("failed to write {}", json_path.display()))?;
        println!("described: {}", json_path.display());

        if let TranslatedArtifact::Image(img) = &translated.artifact {
            let png_path = output_dir.join(format!("{stem}.png"));
            img.save_png(&png_path.display().to_string())?;
            println!("baked: {}", png_path.display());
        }
    }

    log::info!(
        "translated {} root(s), {} cached artifact(s)",
        loaded.roots.len(),
        session.cache().len()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let argv: Vec<String> = std::env::args().skip(1).collect();
    run(parse_cli(&argv)?)
}
