fn main() {
    capnpc::CompilerCommand::new()
        .file("schema/g8ufs.capnp")
        .run()
        .expect("compiling schema/g8ufs.capnp");
}
