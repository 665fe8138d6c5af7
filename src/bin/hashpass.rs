use anyhow::{Context, bail};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(email), Some(password)) = (args.next(), args.next()) else {
        bail!("Usage: hashpass <email> <password>");
    };

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash error: {e}"))
        .context("unable to hash password")?
        .to_string();

    println!("{phc}");
    println!();
    println!(
        "WITH u AS (\n  INSERT INTO app_user (email, password_hash)\n  VALUES ('{}', '{phc}')\n  RETURNING user_id\n)\nINSERT INTO profiles (id, clinic_id, role, full_name)\nSELECT user_id, '<clinic-id>', 'owner', NULL FROM u;",
        email.replace('\'', "''")
    );
    Ok(())
}
