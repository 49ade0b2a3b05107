//! `conexus keygen`: print a fresh identity.

use conexus_types::identity::AgentIdentity;

pub fn cmd_keygen(json: bool) -> anyhow::Result<()> {
    let identity = AgentIdentity::generate();
    if json {
        let out = serde_json::json!({
            "did": identity.did(),
            "public_key": identity.public_key_hex(),
            "secret": identity.secret_hex(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("did:        {}", identity.did());
        println!("public_key: {}", identity.public_key_hex());
        println!("secret:     {}", identity.secret_hex());
        println!();
        println!("Keep the secret private. Set it as identity_secret in config.toml");
        println!("to give the gateway a stable identity.");
    }
    Ok(())
}
